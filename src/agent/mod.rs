pub mod prompt;

use crate::llm::{LlmProvider, Message, ToolDefinition};
use crate::output;
use crate::sandbox::{Execution, SandboxClient, SandboxError};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;

const MAX_RESULT_CHARS: usize = 50_000;
pub const EXECUTE_PYTHON: &str = "execute_python";

/// Executes code on behalf of the agent. The production implementation is a
/// remote sandbox; tests script one.
pub trait CodeRunner {
    fn run(
        &self,
        code: &str,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> Result<Execution, SandboxError>;
}

/// Runs code in one sandbox via the control API.
pub struct SandboxRunner {
    client: SandboxClient,
    sandbox_id: String,
}

impl SandboxRunner {
    pub fn new(client: SandboxClient, sandbox_id: String) -> Self {
        Self { client, sandbox_id }
    }
}

impl CodeRunner for SandboxRunner {
    fn run(
        &self,
        code: &str,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> Result<Execution, SandboxError> {
        self.client
            .run_code_streaming(&self.sandbox_id, code, on_stdout, on_stderr)
    }
}

pub struct AgentConfig {
    pub max_turns: usize,
    pub artifacts_dir: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            artifacts_dir: PathBuf::from("./artifacts"),
        }
    }
}

pub struct Agent {
    pub llm: Box<dyn LlmProvider>,
    pub runner: Box<dyn CodeRunner>,
    pub memory: Vec<Message>,
    pub config: AgentConfig,
}

/// The single tool every conversation carries: run python in the sandbox.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![ToolDefinition {
        name: EXECUTE_PYTHON.to_string(),
        description: "Execute python code in a Jupyter-like sandbox cell. State persists \
                      between executions. Returns stdout, stderr, the value of the last \
                      expression, and any rendered charts."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "The python code to execute"
                }
            },
            "required": ["code"]
        }),
    }]
}

impl Agent {
    pub fn new(llm: Box<dyn LlmProvider>, runner: Box<dyn CodeRunner>, config: AgentConfig) -> Self {
        let memory = vec![Message::system(&prompt::system_prompt())];
        Self {
            llm,
            runner,
            memory,
            config,
        }
    }

    pub fn process_message(&mut self, user_input: &str) -> String {
        self.process_message_with_callback(user_input, &mut |_| {})
    }

    /// One user turn: ask the model, execute any requested code, feed the
    /// results back, and repeat until the model answers in plain text.
    pub fn process_message_with_callback(
        &mut self,
        user_input: &str,
        on_token: &mut dyn FnMut(&str),
    ) -> String {
        self.memory.push(Message::user(user_input));
        let tools = tool_definitions();

        for _turn in 0..self.config.max_turns {
            let response = match self.llm.chat_streaming(&self.memory, &tools, on_token) {
                Ok(resp) => resp,
                Err(e) => return format!("Error: {}", e),
            };

            if response.tool_calls.is_empty() {
                let content = response.content.unwrap_or_default();
                self.memory.push(Message::assistant(&content));
                return content;
            }

            let tool_calls = response.tool_calls;
            self.memory
                .push(Message::assistant_with_tool_calls(tool_calls.clone()));

            for tool_call in &tool_calls {
                eprintln!("  {}", format!("[tool: {}]", tool_call.name).cyan());

                let result = if tool_call.name == EXECUTE_PYTHON {
                    self.execute_code(&tool_call.arguments)
                } else {
                    format!("Unknown tool: {}", tool_call.name)
                };

                let result = output::truncate(&result, MAX_RESULT_CHARS);
                self.memory
                    .push(Message::tool_result(&tool_call.id, &result));
            }
        }

        "Maximum turns reached. The task could not be completed.".to_string()
    }

    /// Run one code string in the sandbox and render the outcome as
    /// tool-result text. Failures come back as text too — the model gets a
    /// chance to react instead of the conversation dying.
    fn execute_code(&self, arguments: &serde_json::Value) -> String {
        let Some(code) = arguments.get("code").and_then(|c| c.as_str()) else {
            return "Tool error: missing 'code' argument".to_string();
        };

        let execution = self.runner.run(
            code,
            &mut |line| eprintln!("  {}", line.dimmed()),
            &mut |line| eprintln!("  {}", format!("[stderr] {}", line).yellow()),
        );

        let execution = match execution {
            Ok(e) => e,
            Err(e) => return format!("Tool error: {}", e),
        };

        for result in &execution.results {
            if let Some(ref png) = result.png {
                match output::save_png(&self.config.artifacts_dir, png) {
                    Ok(path) => eprintln!("  {}", format!("[saved {}]", path.display()).green()),
                    Err(e) => eprintln!("  {}", format!("[image not saved: {}]", e).yellow()),
                }
            }
        }

        let text = execution.text();
        if text.is_empty() {
            "Code executed with no output.".to_string()
        } else {
            text
        }
    }
}
