use super::{LlmError, LlmProvider, LlmResponse, Message, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Client for the Gemini generateContent API.
///
/// Gemini has no call ids; the function name doubles as the id so the
/// matching `functionResponse` can name the function it answers. Streaming
/// goes through the trait's fallback.
pub struct GeminiClient {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    client: reqwest::blocking::Client,
}

// --- generateContent request/response types ---

#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolDeclarations>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Serialize)]
struct ToolDeclarations {
    #[serde(rename = "functionDeclarations")]
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Content,
}

// --- Implementation ---

impl GeminiClient {
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

    fn convert_messages(messages: &[Message]) -> (Option<Content>, Vec<Content>) {
        let mut system_instruction: Option<Content> = None;
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => {
                    let text = msg.content.clone();
                    match system_instruction {
                        Some(ref mut si) => si.parts.push(Part::Text { text }),
                        None => {
                            system_instruction = Some(Content {
                                role: None,
                                parts: vec![Part::Text { text }],
                            })
                        }
                    }
                }
                Role::User => contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::Text {
                        text: msg.content.clone(),
                    }],
                }),
                Role::Assistant => {
                    let mut parts = Vec::new();
                    if !msg.content.is_empty() || msg.tool_calls.is_empty() {
                        parts.push(Part::Text {
                            text: msg.content.clone(),
                        });
                    }
                    for tc in &msg.tool_calls {
                        parts.push(Part::FunctionCall {
                            function_call: FunctionCall {
                                name: tc.name.clone(),
                                args: tc.arguments.clone(),
                            },
                        });
                    }
                    contents.push(Content {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
                Role::Tool => {
                    // tool_call_id holds the function name (see parse_response)
                    contents.push(Content {
                        role: Some("user".to_string()),
                        parts: vec![Part::FunctionResponse {
                            function_response: FunctionResponse {
                                name: msg.tool_call_id.clone().unwrap_or_default(),
                                response: serde_json::json!({"result": msg.content}),
                            },
                        }],
                    });
                }
            }
        }

        (system_instruction, contents)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ToolDeclarations> {
        if tools.is_empty() {
            return Vec::new();
        }
        vec![ToolDeclarations {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                })
                .collect(),
        }]
    }

    fn parse_response(resp: GenerateContentResponse) -> Result<LlmResponse, LlmError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError("No candidates in response".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for part in candidate.content.parts {
            match part {
                Part::Text { text: t } => text.push_str(&t),
                Part::FunctionCall { function_call } => tool_calls.push(ToolCall {
                    id: function_call.name.clone(),
                    name: function_call.name,
                    arguments: function_call.args,
                }),
                Part::FunctionResponse { .. } => {}
            }
        }

        Ok(LlmResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        })
    }
}

impl LlmProvider for GeminiClient {
    fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let (system_instruction, contents) = Self::convert_messages(messages);
        let request = GenerateContentRequest {
            contents,
            system_instruction,
            tools: Self::convert_tools(tools),
        };

        let response = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ConnectionError(format!(
                        "Cannot connect to Gemini API at {}",
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
                "Model '{}' not found on Gemini API",
                self.model
            )));
        }
        if status == reqwest::StatusCode::BAD_REQUEST
            || status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::RequestError(format!(
                "Gemini API rejected the request ({}): {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(LlmError::RequestError(format!(
                "Gemini API returned status {}: {}",
                status, body
            )));
        }

        let body: GenerateContentResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(format!("Failed to parse response: {}", e)))?;

        Self::parse_response(body)
    }
}
