pub mod client;

pub use client::SandboxClient;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A sandbox as reported by the control API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub template: String,
    pub started_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// One rich result emitted by the interpreter (the value of the last
/// expression in a cell, a rendered chart, ...). Text and PNG can coexist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RichResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64-encoded PNG bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<String>,
}

/// A runtime error raised by the executed code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionError {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub traceback: String,
}

/// Everything one code execution produced.
#[derive(Debug, Clone, Default)]
pub struct Execution {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub results: Vec<RichResult>,
    pub error: Option<ExecutionError>,
}

impl Execution {
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Render the execution in the textual form relayed back into the
    /// conversation: stdout, then stderr, then result text, then the error.
    pub fn text(&self) -> String {
        let mut out = String::new();
        if !self.stdout.is_empty() {
            out.push_str(&self.stdout.join("\n"));
        }
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("[stderr]\n");
            out.push_str(&self.stderr.join("\n"));
        }
        for result in &self.results {
            if let Some(ref text) = result.text {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
            if result.png.is_some() {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str("[image result]");
            }
        }
        if let Some(ref err) = self.error {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[error] {}: {}", err.name, err.value));
            if !err.traceback.is_empty() {
                out.push('\n');
                out.push_str(&err.traceback);
            }
        }
        out
    }
}

/// Output of a shell command run inside the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[derive(Debug)]
pub enum SandboxError {
    Connection(String),
    Api { status: u16, message: String },
    Protocol(String),
    NotFound(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::Connection(msg) => write!(f, "Connection error: {}", msg),
            SandboxError::Api { status, message } => {
                write!(f, "Sandbox API error ({}): {}", status, message)
            }
            SandboxError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SandboxError::NotFound(id) => write!(f, "Sandbox not found: {}", id),
        }
    }
}

impl std::error::Error for SandboxError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_text_stdout_only() {
        let exec = Execution {
            stdout: vec!["1".to_string(), "2".to_string()],
            ..Execution::default()
        };
        assert_eq!(exec.text(), "1\n2");
    }

    #[test]
    fn test_execution_text_combines_streams() {
        let exec = Execution {
            stdout: vec!["out".to_string()],
            stderr: vec!["warning".to_string()],
            ..Execution::default()
        };
        assert_eq!(exec.text(), "out\n[stderr]\nwarning");
    }

    #[test]
    fn test_execution_text_includes_result_text() {
        let exec = Execution {
            results: vec![RichResult {
                text: Some("42".to_string()),
                png: None,
            }],
            ..Execution::default()
        };
        assert_eq!(exec.text(), "42");
    }

    #[test]
    fn test_execution_text_marks_image_results() {
        let exec = Execution {
            results: vec![RichResult {
                text: None,
                png: Some("aGVsbG8=".to_string()),
            }],
            ..Execution::default()
        };
        assert_eq!(exec.text(), "[image result]");
    }

    #[test]
    fn test_execution_text_includes_error_and_traceback() {
        let exec = Execution {
            error: Some(ExecutionError {
                name: "NameError".to_string(),
                value: "name 'pd' is not defined".to_string(),
                traceback: "Traceback (most recent call last): ...".to_string(),
            }),
            ..Execution::default()
        };
        let text = exec.text();
        assert!(text.starts_with("[error] NameError: name 'pd' is not defined"));
        assert!(text.contains("Traceback"));
        assert!(exec.has_error());
    }

    #[test]
    fn test_execution_text_empty() {
        assert_eq!(Execution::default().text(), "");
        assert!(!Execution::default().has_error());
    }

    #[test]
    fn test_sandbox_info_deserialization() {
        let body = serde_json::json!({
            "sandbox_id": "sb_1a2b3c",
            "template": "python-data-science",
            "started_at": "2025-06-01T12:00:00Z",
            "end_at": "2025-06-01T12:05:00Z"
        });
        let info: SandboxInfo = serde_json::from_value(body).unwrap();
        assert_eq!(info.sandbox_id, "sb_1a2b3c");
        assert_eq!(info.template, "python-data-science");
        assert!(info.metadata.is_none());
        assert!(info.end_at > info.started_at);
    }

    #[test]
    fn test_command_output_deserialization() {
        let body = serde_json::json!({
            "stdout": "hello\n",
            "stderr": "",
            "exit_code": 0
        });
        let out: CommandOutput = serde_json::from_value(body).unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.exit_code, 0);
    }

    #[test]
    fn test_execution_error_default_traceback() {
        let body = serde_json::json!({"name": "ValueError", "value": "bad input"});
        let err: ExecutionError = serde_json::from_value(body).unwrap();
        assert!(err.traceback.is_empty());
    }

    #[test]
    fn test_sandbox_error_display() {
        let err = SandboxError::Api {
            status: 429,
            message: "rate limited".to_string(),
        };
        assert_eq!(err.to_string(), "Sandbox API error (429): rate limited");
        assert_eq!(
            SandboxError::NotFound("sb_x".to_string()).to_string(),
            "Sandbox not found: sb_x"
        );
    }
}
