use super::{LlmError, LlmProvider, LlmResponse, Message, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Client for the OpenAI chat completions API.
///
/// Groq exposes the same wire format, so this client serves both: point
/// `base_url` at `https://api.groq.com/openai` and pass a Groq model name.
pub struct OpenAiClient {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    client: reqwest::blocking::Client,
}

// --- chat/completions request/response types ---

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSpec>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: FunctionCall,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionCall {
    name: String,
    // The API carries arguments as a JSON-encoded string, not an object.
    arguments: String,
}

#[derive(Serialize)]
struct ToolSpec {
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionSpec,
}

#[derive(Serialize)]
struct FunctionSpec {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ApiMessage,
}

// --- Implementation ---

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            client,
        }
    }

    fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| {
                let tool_calls = if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                call_type: "function".to_string(),
                                function: FunctionCall {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.to_string(),
                                },
                            })
                            .collect(),
                    )
                };
                ApiMessage {
                    role: m.role.to_string(),
                    content: if m.content.is_empty() && tool_calls.is_some() {
                        None
                    } else {
                        Some(m.content.clone())
                    },
                    tool_calls,
                    tool_call_id: m.tool_call_id.clone(),
                }
            })
            .collect()
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ToolSpec> {
        tools
            .iter()
            .map(|t| ToolSpec {
                tool_type: "function".to_string(),
                function: FunctionSpec {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn parse_arguments(raw: &str) -> serde_json::Value {
        serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }

    fn send(
        &self,
        request: &ChatCompletionRequest,
    ) -> Result<reqwest::blocking::Response, LlmError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ConnectionError(format!("Cannot connect to {}", self.base_url))
                } else if e.is_timeout() {
                    LlmError::RequestError("Request timed out".to_string())
                } else {
                    LlmError::RequestError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(format!(
                "Model '{}' not found at {}",
                self.model, self.base_url
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(LlmError::RequestError(
                "Authentication failed. Check your API key.".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::RequestError(format!(
                "API returned status {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

impl LlmProvider for OpenAiClient {
    fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            stream: false,
        };

        let response = self.send(&request)?;

        let body: ChatCompletionResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(format!("Failed to parse response: {}", e)))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("No choices in response".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: Self::parse_arguments(&tc.function.arguments),
            })
            .collect();

        Ok(LlmResponse {
            content: choice.message.content.filter(|c| !c.is_empty()),
            tool_calls,
        })
    }

    fn chat_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_token: &mut dyn FnMut(&str),
    ) -> Result<LlmResponse, LlmError> {
        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::convert_messages(messages),
            tools: Self::convert_tools(tools),
            stream: true,
        };

        let response = self.send(&request)?;

        let reader = std::io::BufReader::new(response);
        let mut accumulated = String::new();
        // Tool calls stream in fragments keyed by index: (id, name, arguments)
        let mut partial_calls: std::collections::BTreeMap<usize, (String, String, String)> =
            std::collections::BTreeMap::new();

        use std::io::BufRead;
        for line_result in reader.lines() {
            let line = line_result
                .map_err(|e| LlmError::ParseError(format!("Failed to read stream: {}", e)))?;
            let line = line.trim();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                break;
            }

            let chunk: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            let Some(delta) = chunk
                .get("choices")
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .map(|c| &c["delta"])
            else {
                continue;
            };

            if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    on_token(text);
                    accumulated.push_str(text);
                }
            }

            if let Some(calls) = delta.get("tool_calls").and_then(|tc| tc.as_array()) {
                for tc in calls {
                    let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                    let entry = partial_calls.entry(index).or_default();
                    if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                        entry.0 = id.to_string();
                    }
                    if let Some(func) = tc.get("function") {
                        if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                            entry.1 = name.to_string();
                        }
                        if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                            entry.2.push_str(args);
                        }
                    }
                }
            }
        }

        let tool_calls = partial_calls
            .into_values()
            .map(|(id, name, args)| ToolCall {
                id,
                name,
                arguments: Self::parse_arguments(&args),
            })
            .collect();

        Ok(LlmResponse {
            content: if accumulated.is_empty() {
                None
            } else {
                Some(accumulated)
            },
            tool_calls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_stores_config() {
        let client = OpenAiClient::new("https://api.openai.com", "gpt-4o", "sk-test".into());
        assert_eq!(client.base_url, "https://api.openai.com");
        assert_eq!(client.model, "gpt-4o");
        assert_eq!(client.api_key, "sk-test");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = OpenAiClient::new("https://api.groq.com/openai/", "llama-3.3-70b", "k".into());
        assert_eq!(client.base_url, "https://api.groq.com/openai");
    }

    #[test]
    fn test_convert_user_message() {
        let converted = OpenAiClient::convert_messages(&[Message::user("plot sales")]);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].role, "user");
        assert_eq!(converted[0].content.as_deref(), Some("plot sales"));
        assert!(converted[0].tool_calls.is_none());
    }

    #[test]
    fn test_convert_assistant_with_tool_calls() {
        let messages = vec![Message::assistant_with_tool_calls(vec![ToolCall {
            id: "call_0".to_string(),
            name: "execute_python".to_string(),
            arguments: json!({"code": "print(1)"}),
        }])];
        let converted = OpenAiClient::convert_messages(&messages);
        assert_eq!(converted[0].role, "assistant");
        // Empty content alongside tool calls must serialize as absent
        assert!(converted[0].content.is_none());
        let calls = converted[0].tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].function.name, "execute_python");
        assert_eq!(calls[0].function.arguments, "{\"code\":\"print(1)\"}");
    }

    #[test]
    fn test_convert_tool_result_message() {
        let converted =
            OpenAiClient::convert_messages(&[Message::tool_result("call_0", "stdout: 4")]);
        assert_eq!(converted[0].role, "tool");
        assert_eq!(converted[0].tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(converted[0].content.as_deref(), Some("stdout: 4"));
    }

    #[test]
    fn test_convert_tools() {
        let tools = vec![ToolDefinition {
            name: "execute_python".to_string(),
            description: "Run python code".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"code": {"type": "string"}},
                "required": ["code"]
            }),
        }];
        let converted = OpenAiClient::convert_tools(&tools);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].tool_type, "function");
        assert_eq!(converted[0].function.name, "execute_python");
    }

    #[test]
    fn test_request_omits_empty_tools() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![],
            tools: vec![],
            stream: false,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert!(value.get("tools").is_none());
        assert_eq!(value["stream"], false);
    }

    #[test]
    fn test_response_parse_with_tool_call() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "execute_python",
                            "arguments": "{\"code\":\"import pandas\"}"
                        }
                    }]
                }
            }]
        });
        let resp: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let calls = resp.choices[0].message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "call_abc");
        let args = OpenAiClient::parse_arguments(&calls[0].function.arguments);
        assert_eq!(args["code"], "import pandas");
    }

    #[test]
    fn test_parse_arguments_invalid_json_becomes_empty_object() {
        let args = OpenAiClient::parse_arguments("not json {{{");
        assert!(args.is_object());
        assert_eq!(args.as_object().unwrap().len(), 0);
    }

    #[test]
    fn test_sse_tool_call_fragments_reassemble() {
        // Arguments arrive split across deltas; reassembly is keyed by index.
        let deltas = [
            json!({"index": 0, "id": "call_9", "function": {"name": "execute_python", "arguments": ""}}),
            json!({"index": 0, "function": {"arguments": "{\"co"}}),
            json!({"index": 0, "function": {"arguments": "de\":\"1+1\"}"}}),
        ];

        let mut partial_calls: std::collections::BTreeMap<usize, (String, String, String)> =
            std::collections::BTreeMap::new();
        for tc in &deltas {
            let index = tc.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
            let entry = partial_calls.entry(index).or_default();
            if let Some(id) = tc.get("id").and_then(|i| i.as_str()) {
                entry.0 = id.to_string();
            }
            if let Some(func) = tc.get("function") {
                if let Some(name) = func.get("name").and_then(|n| n.as_str()) {
                    entry.1 = name.to_string();
                }
                if let Some(args) = func.get("arguments").and_then(|a| a.as_str()) {
                    entry.2.push_str(args);
                }
            }
        }

        let (id, name, args) = &partial_calls[&0];
        assert_eq!(id, "call_9");
        assert_eq!(name, "execute_python");
        assert_eq!(
            OpenAiClient::parse_arguments(args),
            json!({"code": "1+1"})
        );
    }

    #[test]
    fn test_sse_data_prefix_handling() {
        assert_eq!(
            "data: [DONE]".trim().strip_prefix("data: "),
            Some("[DONE]")
        );
        assert_eq!(": keepalive comment".strip_prefix("data: "), None);
    }

    #[test]
    fn test_response_parse_empty_content_filtered() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": ""}}]
        });
        let resp: ChatCompletionResponse = serde_json::from_value(body).unwrap();
        let content = resp.choices[0]
            .message
            .content
            .clone()
            .filter(|c| !c.is_empty());
        assert!(content.is_none());
    }
}
