use super::{LlmError, LlmProvider, LlmResponse, Message, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    client: reqwest::blocking::Client,
}

// --- Messages API request/response types ---

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ToolSchema>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct ApiMessage {
    role: String,
    content: MessageContent,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Blocks(Vec<Block>),
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
enum Block {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult { tool_use_id: String, content: String },
}

#[derive(Serialize)]
struct ToolSchema {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    content: Vec<Block>,
}

// --- Implementation ---

impl AnthropicClient {
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

    /// The Messages API takes the system prompt as a top-level field, tool
    /// results as user-role blocks, and tool calls as assistant blocks.
    fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<ApiMessage>) {
        let mut system: Option<String> = None;
        let mut converted = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => match system {
                    None => system = Some(msg.content.clone()),
                    Some(ref mut s) => {
                        s.push_str("\n\n");
                        s.push_str(&msg.content);
                    }
                },
                Role::User => converted.push(ApiMessage {
                    role: "user".to_string(),
                    content: MessageContent::Text(msg.content.clone()),
                }),
                Role::Assistant => {
                    if msg.tool_calls.is_empty() {
                        converted.push(ApiMessage {
                            role: "assistant".to_string(),
                            content: MessageContent::Text(msg.content.clone()),
                        });
                    } else {
                        let mut blocks = Vec::new();
                        if !msg.content.is_empty() {
                            blocks.push(Block::Text {
                                text: msg.content.clone(),
                            });
                        }
                        for tc in &msg.tool_calls {
                            blocks.push(Block::ToolUse {
                                id: tc.id.clone(),
                                name: tc.name.clone(),
                                input: tc.arguments.clone(),
                            });
                        }
                        converted.push(ApiMessage {
                            role: "assistant".to_string(),
                            content: MessageContent::Blocks(blocks),
                        });
                    }
                }
                Role::Tool => converted.push(ApiMessage {
                    role: "user".to_string(),
                    content: MessageContent::Blocks(vec![Block::ToolResult {
                        tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                        content: msg.content.clone(),
                    }]),
                }),
            }
        }

        (system, converted)
    }

    fn convert_tools(tools: &[ToolDefinition]) -> Vec<ToolSchema> {
        tools
            .iter()
            .map(|t| ToolSchema {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.parameters.clone(),
            })
            .collect()
    }

    fn parse_response(resp: MessagesResponse) -> LlmResponse {
        let mut text = String::new();
        let mut tool_calls = Vec::new();

        for block in resp.content {
            match block {
                Block::Text { text: t } => text.push_str(&t),
                Block::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                Block::ToolResult { .. } => {}
            }
        }

        LlmResponse {
            content: if text.is_empty() { None } else { Some(text) },
            tool_calls,
        }
    }

    fn send(&self, request: &MessagesRequest) -> Result<reqwest::blocking::Response, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(request)
            .send()
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::ConnectionError(format!(
                        "Cannot connect to Anthropic API at {}",
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
                "Model '{}' not found on Anthropic API",
                self.model
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
                "Anthropic API returned status {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

impl LlmProvider for AnthropicClient {
    fn chat(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<LlmResponse, LlmError> {
        let (system, api_messages) = Self::convert_messages(messages);
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system,
            messages: api_messages,
            tools: Self::convert_tools(tools),
            stream: false,
        };

        let response = self.send(&request)?;
        let body: MessagesResponse = response
            .json()
            .map_err(|e| LlmError::ParseError(format!("Failed to parse response: {}", e)))?;

        Ok(Self::parse_response(body))
    }

    fn chat_streaming(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        on_token: &mut dyn FnMut(&str),
    ) -> Result<LlmResponse, LlmError> {
        let (system, api_messages) = Self::convert_messages(messages);
        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system,
            messages: api_messages,
            tools: Self::convert_tools(tools),
            stream: true,
        };

        let response = self.send(&request)?;

        let reader = std::io::BufReader::new(response);
        let mut accumulated = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        // Tool-use blocks stream as a start event, input_json_delta fragments,
        // then a stop event that seals the call.
        let mut open_tool_id = String::new();
        let mut open_tool_name = String::new();
        let mut open_tool_input = String::new();

        use std::io::BufRead;
        for line_result in reader.lines() {
            let line = line_result
                .map_err(|e| LlmError::ParseError(format!("Failed to read stream: {}", e)))?;
            let line = line.trim();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "content_block_start" => {
                    if let Some(block) = event.get("content_block") {
                        if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                            open_tool_id = block
                                .get("id")
                                .and_then(|i| i.as_str())
                                .unwrap_or_default()
                                .to_string();
                            open_tool_name = block
                                .get("name")
                                .and_then(|n| n.as_str())
                                .unwrap_or_default()
                                .to_string();
                            open_tool_input.clear();
                        }
                    }
                }
                "content_block_delta" => {
                    if let Some(delta) = event.get("delta") {
                        match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                            "text_delta" => {
                                if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                                    if !text.is_empty() {
                                        on_token(text);
                                        accumulated.push_str(text);
                                    }
                                }
                            }
                            "input_json_delta" => {
                                if let Some(partial) =
                                    delta.get("partial_json").and_then(|p| p.as_str())
                                {
                                    open_tool_input.push_str(partial);
                                }
                            }
                            _ => {}
                        }
                    }
                }
                "content_block_stop" => {
                    if !open_tool_name.is_empty() {
                        let arguments: serde_json::Value =
                            serde_json::from_str(&open_tool_input).unwrap_or_else(|_| {
                                serde_json::Value::Object(serde_json::Map::new())
                            });
                        tool_calls.push(ToolCall {
                            id: std::mem::take(&mut open_tool_id),
                            name: std::mem::take(&mut open_tool_name),
                            arguments,
                        });
                        open_tool_input.clear();
                    }
                }
                "message_stop" => break,
                _ => {}
            }
        }

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
