use super::{LlmError, LlmProvider, LlmResponse, Message, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

const MAX_TOKENS: u32 = 4096;

/// Client for the Amazon Bedrock Converse API, authenticated with a Bedrock
/// API key (bearer token) rather than SigV4. ConverseStream frames its
/// events in the AWS binary event-stream encoding, not SSE, so streaming
/// goes through the trait's fallback.
pub struct BedrockClient {
    pub base_url: String,
    pub model_id: String,
    pub api_key: String,
    client: reqwest::blocking::Client,
}

// --- Converse API request/response types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<SystemBlock>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
    inference_config: InferenceConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct SystemBlock {
    text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
enum ContentBlock {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "toolUse")]
    ToolUse(ToolUseBlock),
    #[serde(rename = "toolResult")]
    ToolResult(ToolResultBlock),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct ToolUseBlock {
    tool_use_id: String,
    name: String,
    input: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct ToolResultBlock {
    tool_use_id: String,
    content: Vec<ToolResultContent>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ToolResultContent {
    text: String,
}

#[derive(Serialize)]
struct ToolConfig {
    tools: Vec<ToolEntry>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolEntry {
    tool_spec: ToolSpec,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSpec {
    name: String,
    description: String,
    input_schema: InputSchema,
}

#[derive(Serialize)]
struct InputSchema {
    json: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    max_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct ConverseResponse {
    output: ConverseOutput,
}

#[derive(Deserialize, Debug)]
struct ConverseOutput {
    message: ApiMessage,
}

// --- Implementation ---

impl BedrockClient {
    pub fn new(base_url: &str, model_id: &str, api_key: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            api_key,
            client,
        }
    }

    fn convert_messages(messages: &[Message]) -> (Vec<SystemBlock>, Vec<ApiMessage>) {
        let mut system = Vec::new();
        let mut converted: Vec<ApiMessage> = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system.push(SystemBlock {
                    text: msg.content.clone(),
                }),
                Role::User => converted.push(ApiMessage {
                    role: "user".to_string(),
                    content: vec![ContentBlock::Text(msg.content.clone())],
                }),
                Role::Assistant => {
                    let mut content = Vec::new();
                    if !msg.content.is_empty() {
                        content.push(ContentBlock::Text(msg.content.clone()));
                    }
                    for tc in &msg.tool_calls {
                        content.push(ContentBlock::ToolUse(ToolUseBlock {
                            tool_use_id: tc.id.clone(),
                            name: tc.name.clone(),
                            input: tc.arguments.clone(),
                        }));
                    }
                    converted.push(ApiMessage {
                        role: "assistant".to_string(),
                        content,
                    });
                }
                Role::Tool => {
                    let block = ContentBlock::ToolResult(ToolResultBlock {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: vec![ToolResultContent {
                            text: msg.content.clone(),
                        }],
                    });
                    // Converse requires consecutive tool results to share one
                    // user message.
                    match converted.last_mut() {
                        Some(last)
                            if last.role == "user"
                                && matches!(
                                    last.content.first(),
                                    Some(ContentBlock::ToolResult(_))
                                ) =>
                        {
                            last.content.push(block)
                        }
                        _ => converted.push(ApiMessage {
                            role: "user".to_string(),
                            content: vec![block],
                        }),
                    }
                }
            }
        }

        (system, converted)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Option<ToolConfig> {
        if tools.is_empty() {
            return None;
        }
        Some(ToolConfig {
            tools: tools
                .iter()
                .map(|t| ToolEntry {
                    tool_spec: ToolSpec {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        input_schema: InputSchema {
                            json: t.parameters.clone(),
                        },
                    },
                })
                .collect(),
        })
    }

    fn parse_response(resp: ConverseResponse) -> LlmResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.output.message.content {
            match block {
                ContentBlock::Text(t) => text.push_str(&t),
                ContentBlock::ToolUse(tu) => tool_calls.push(ToolCall {
                    id: tu.tool_use_id,
                    name: tu.name,
                    arguments: tu.input,
                }),
                ContentBlock::ToolResult(_) => {}
            }
        }

        LlmResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        }
    }
}

impl LlmProvider for BedrockClient {
    fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let url = format!("{}/model/{}/converse", self.base_url, self.model_id);
        let (system, api_messages) = Self::convert_messages(messages);

        let request = ConverseRequest {
            system,
            messages: api_messages,
            tool_config: Self::convert_tools(tools),
            inference_config: InferenceConfig {
                max_tokens: MAX_TOKENS,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ConnectionError(format!(
                        "Cannot connect to Bedrock runtime at {}",
                        self.base_url
                    ))
                } else if e.is_timeout() {
                    LlmError::RequestError("Request timed out".to_string())
                } else {
                    LlmError::RequestError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(LlmError::ModelNotFound(format!(
                "Model '{}' not found in this Bedrock region",
                self.model_id
            )));
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(LlmError::RequestError(
                "Authentication failed. Check AWS_BEARER_TOKEN_BEDROCK.".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::RequestError(format!(
                "Bedrock returned status {}: {}",
                status, body
            )));
        }

        let body: ConverseResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(format!("Failed to parse response: {}", e)))?;

        Ok(Self::parse_response(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_messages_become_system_blocks() {
        let (system, msgs) = BedrockClient::convert_messages(&[
            Message::system("persona"),
            Message::user("hello"),
        ]);
        assert_eq!(system.len(), 1);
        assert_eq!(system[0].text, "persona");
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_tool_use_serialization() {
        let (_, msgs) =
            BedrockClient::convert_messages(&[Message::assistant_with_tool_calls(vec![ToolCall {
                id: "tooluse_1".to_string(),
                name: "execute_python".to_string(),
                arguments: json!({"code": "sum(range(10))"}),
            }])]);
        let value = serde_json::to_value(&msgs[0]).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["content"][0]["toolUse"]["toolUseId"], "tooluse_1");
        assert_eq!(value["content"][0]["toolUse"]["name"], "execute_python");
    }

    #[test]
    fn test_tool_result_serialization() {
        let (_, msgs) =
            BedrockClient::convert_messages(&[Message::tool_result("tooluse_1", "45")]);
        let value = serde_json::to_value(&msgs[0]).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(
            value["content"][0]["toolResult"]["toolUseId"],
            "tooluse_1"
        );
        assert_eq!(
            value["content"][0]["toolResult"]["content"][0]["text"],
            "45"
        );
    }

    #[test]
    fn test_consecutive_tool_results_share_one_user_message() {
        let (_, msgs) = BedrockClient::convert_messages(&[
            Message::tool_result("tooluse_1", "a"),
            Message::tool_result("tooluse_2", "b"),
        ]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content.len(), 2);
    }

    #[test]
    fn test_tool_config_schema_nesting() {
        let config = BedrockClient::convert_tools(&[ToolDefinition {
            name: "execute_python".to_string(),
            description: "Run python".to_string(),
            parameters: json!({"type": "object", "properties": {"code": {"type": "string"}}}),
        }])
        .unwrap();
        let value = serde_json::to_value(&config).unwrap();
        let spec = &value["tools"][0]["toolSpec"];
        assert_eq!(spec["name"], "execute_python");
        assert_eq!(spec["inputSchema"]["json"]["type"], "object");
    }

    #[test]
    fn test_empty_tools_omit_tool_config() {
        assert!(BedrockClient::convert_tools(&[]).is_none());
    }

    #[test]
    fn test_parse_converse_response() {
        let body = json!({
            "output": {
                "message": {
                    "role": "assistant",
                    "content": [
                        {"text": "Running it now."},
                        {"toolUse": {"toolUseId": "tooluse_2", "name": "execute_python",
                                     "input": {"code": "print(42)"}}}
                    ]
                }
            },
            "stopReason": "tool_use"
        });
        let resp: ConverseResponse = serde_json::from_value(body).unwrap();
        let parsed = BedrockClient::parse_response(resp);
        assert_eq!(parsed.content.as_deref(), Some("Running it now."));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "tooluse_2");
    }

    #[test]
    fn test_request_serialization_camel_case() {
        let request = ConverseRequest {
            system: vec![],
            messages: vec![],
            tool_config: None,
            inference_config: InferenceConfig { max_tokens: 4096 },
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(value["inferenceConfig"]["maxTokens"], 4096);
        assert!(value.get("system").is_none());
        assert!(value.get("toolConfig").is_none());
    }
}
