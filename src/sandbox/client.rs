use super::{CommandOutput, Execution, ExecutionError, RichResult, SandboxError, SandboxInfo};
use base64::Engine;
use serde::{Deserialize, Serialize};

const CREATE_ATTEMPTS: u32 = 3;

/// Client for the sandbox control API: lifecycle, files, commands, and the
/// streamed run-code endpoint. Cloning is cheap — the underlying HTTP client
/// is shared.
#[derive(Clone)]
pub struct SandboxClient {
    pub base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct CreateSandboxRequest<'a> {
    template: &'a str,
    timeout_secs: u64,
}

#[derive(Serialize)]
struct SetTimeoutRequest {
    timeout_secs: u64,
}

#[derive(Serialize)]
struct RunCodeRequest<'a> {
    code: &'a str,
}

#[derive(Serialize)]
struct RunCommandRequest<'a> {
    command: &'a str,
}

#[derive(Serialize)]
struct WriteFileRequest {
    content: String,
}

#[derive(Deserialize)]
struct FileContent {
    content: String,
}

impl SandboxClient {
    pub fn new(base_url: &str, api_key: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        }
    }

    /// Create a fresh sandbox from a template. Connection failures are
    /// retried a fixed number of times, no backoff.
    pub fn create(&self, template: &str, timeout_secs: u64) -> Result<SandboxInfo, SandboxError> {
        let body = CreateSandboxRequest {
            template,
            timeout_secs,
        };
        let mut last_err = None;
        for _attempt in 0..CREATE_ATTEMPTS {
            match self.post_json("/sandboxes", &body) {
                Ok(response) => return self.parse_json(response),
                Err(e @ SandboxError::Connection(_)) => last_err = Some(e),
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| SandboxError::Connection("sandbox creation failed".to_string())))
    }

    /// Look up a running sandbox by id.
    pub fn connect(&self, sandbox_id: &str) -> Result<SandboxInfo, SandboxError> {
        let response = self.get(&format!("/sandboxes/{}", sandbox_id), sandbox_id)?;
        self.parse_json(response)
    }

    pub fn list(&self) -> Result<Vec<SandboxInfo>, SandboxError> {
        let response = self.get("/sandboxes", "")?;
        self.parse_json(response)
    }

    pub fn kill(&self, sandbox_id: &str) -> Result<(), SandboxError> {
        let url = format!("{}/sandboxes/{}", self.base_url, sandbox_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        self.check_status(response, sandbox_id)?;
        Ok(())
    }

    /// Push the sandbox deadline out to `timeout_secs` from now.
    pub fn set_timeout(&self, sandbox_id: &str, timeout_secs: u64) -> Result<(), SandboxError> {
        let url = format!("{}/sandboxes/{}/timeout", self.base_url, sandbox_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&SetTimeoutRequest { timeout_secs })
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        self.check_status(response, sandbox_id)?;
        Ok(())
    }

    pub fn run_code(&self, sandbox_id: &str, code: &str) -> Result<Execution, SandboxError> {
        self.run_code_streaming(sandbox_id, code, &mut |_| {}, &mut |_| {})
    }

    /// Execute code and stream output as it is produced. `on_stdout` /
    /// `on_stderr` fire once per line; the assembled `Execution` is returned
    /// when the event stream ends. A runtime error in the code is NOT an
    /// `Err` — it travels inside the `Execution` so the caller can relay the
    /// traceback.
    pub fn run_code_streaming(
        &self,
        sandbox_id: &str,
        code: &str,
        on_stdout: &mut dyn FnMut(&str),
        on_stderr: &mut dyn FnMut(&str),
    ) -> Result<Execution, SandboxError> {
        let url = format!("{}/sandboxes/{}/code", self.base_url, sandbox_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&RunCodeRequest { code })
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        let response = self.check_status(response, sandbox_id)?;

        let mut execution = Execution::default();
        let reader = std::io::BufReader::new(response);

        use std::io::BufRead;
        for line_result in reader.lines() {
            let line = line_result
                .map_err(|e| SandboxError::Protocol(format!("Failed to read stream: {}", e)))?;
            let line = line.trim();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };

            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };

            match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "stdout" => {
                    if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                        on_stdout(text);
                        execution.stdout.push(text.to_string());
                    }
                }
                "stderr" => {
                    if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                        on_stderr(text);
                        execution.stderr.push(text.to_string());
                    }
                }
                "result" => {
                    let result = RichResult {
                        text: event
                            .get("text")
                            .and_then(|t| t.as_str())
                            .map(String::from),
                        png: event.get("png").and_then(|p| p.as_str()).map(String::from),
                    };
                    execution.results.push(result);
                }
                "error" => {
                    execution.error = Some(ExecutionError {
                        name: event
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("Error")
                            .to_string(),
                        value: event
                            .get("value")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        traceback: event
                            .get("traceback")
                            .and_then(|t| t.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
                "end" => break,
                _ => {}
            }
        }

        Ok(execution)
    }

    pub fn run_command(
        &self,
        sandbox_id: &str,
        command: &str,
    ) -> Result<CommandOutput, SandboxError> {
        let url = format!("{}/sandboxes/{}/commands", self.base_url, sandbox_id);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&RunCommandRequest { command })
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        let response = self.check_status(response, sandbox_id)?;
        self.parse_json(response)
    }

    /// Write bytes to a path inside the sandbox. Content travels
    /// base64-encoded in the JSON body.
    pub fn write_file(
        &self,
        sandbox_id: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<(), SandboxError> {
        let url = format!("{}/sandboxes/{}/files", self.base_url, sandbox_id);
        let body = WriteFileRequest {
            content: base64::engine::general_purpose::STANDARD.encode(bytes),
        };
        let response = self
            .client
            .put(&url)
            .query(&[("path", path)])
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        self.check_status(response, sandbox_id)?;
        Ok(())
    }

    pub fn read_file(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>, SandboxError> {
        let url = format!("{}/sandboxes/{}/files", self.base_url, sandbox_id);
        let response = self
            .client
            .get(&url)
            .query(&[("path", path)])
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        let response = self.check_status(response, sandbox_id)?;
        let body: FileContent = response
            .json()
            .map_err(|e| SandboxError::Protocol(format!("Failed to parse response: {}", e)))?;
        base64::engine::general_purpose::STANDARD
            .decode(&body.content)
            .map_err(|e| SandboxError::Protocol(format!("Invalid base64 file content: {}", e)))
    }

    // -- Internal --

    fn get(&self, path: &str, sandbox_id: &str) -> Result<reqwest::blocking::Response, SandboxError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        self.check_status(response, sandbox_id)
    }

    fn post_json(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::blocking::Response, SandboxError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| Self::transport_error(&self.base_url, e))?;
        self.check_status(response, "")
    }

    fn check_status(
        &self,
        response: reqwest::blocking::Response,
        sandbox_id: &str,
    ) -> Result<reqwest::blocking::Response, SandboxError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND && !sandbox_id.is_empty() {
            return Err(SandboxError::NotFound(sandbox_id.to_string()));
        }
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(SandboxError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    fn parse_json<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::blocking::Response,
    ) -> Result<T, SandboxError> {
        response
            .json()
            .map_err(|e| SandboxError::Protocol(format!("Failed to parse response: {}", e)))
    }

    fn transport_error(base_url: &str, e: reqwest::Error) -> SandboxError {
        if e.is_connect() {
            SandboxError::Connection(format!("Cannot connect to sandbox service at {}", base_url))
        } else if e.is_timeout() {
            SandboxError::Connection("Request timed out".to_string())
        } else {
            SandboxError::Connection(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = SandboxClient::new("https://sandbox.example.com/", "key".into());
        assert_eq!(client.base_url, "https://sandbox.example.com");
    }

    #[test]
    fn test_create_request_serialization() {
        let body = CreateSandboxRequest {
            template: "python-data-science",
            timeout_secs: 300,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["template"], "python-data-science");
        assert_eq!(value["timeout_secs"], 300);
    }

    #[test]
    fn test_run_code_request_serialization() {
        let body = RunCodeRequest {
            code: "print('hi')",
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["code"], "print('hi')");
    }

    #[test]
    fn test_file_content_base64_roundtrip() {
        let bytes = b"\x89PNG\r\n\x1a\n";
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        let body: FileContent =
            serde_json::from_value(serde_json::json!({"content": encoded})).unwrap();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&body.content)
            .unwrap();
        assert_eq!(decoded, bytes);
    }

    // Event-stream assembly, simulated line by line the way
    // run_code_streaming consumes the response body.
    fn assemble(lines: &[&str]) -> Execution {
        let mut execution = Execution::default();
        for line in lines {
            let Some(data) = line.trim().strip_prefix("data: ") else {
                continue;
            };
            let event: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            match event.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                "stdout" => {
                    if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                        execution.stdout.push(text.to_string());
                    }
                }
                "stderr" => {
                    if let Some(text) = event.get("text").and_then(|t| t.as_str()) {
                        execution.stderr.push(text.to_string());
                    }
                }
                "result" => execution.results.push(RichResult {
                    text: event.get("text").and_then(|t| t.as_str()).map(String::from),
                    png: event.get("png").and_then(|p| p.as_str()).map(String::from),
                }),
                "error" => {
                    execution.error = Some(ExecutionError {
                        name: event
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("Error")
                            .to_string(),
                        value: event
                            .get("value")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        traceback: event
                            .get("traceback")
                            .and_then(|t| t.as_str())
                            .unwrap_or_default()
                            .to_string(),
                    });
                }
                "end" => break,
                _ => {}
            }
        }
        execution
    }

    #[test]
    fn test_event_stream_assembly() {
        let execution = assemble(&[
            r#"data: {"type":"stdout","text":"loading data"}"#,
            r#"data: {"type":"stdout","text":"rows: 100"}"#,
            r#"data: {"type":"result","text":"<Figure>","png":"aWltZw=="}"#,
            r#"data: {"type":"end"}"#,
        ]);
        assert_eq!(execution.stdout, vec!["loading data", "rows: 100"]);
        assert_eq!(execution.results.len(), 1);
        assert_eq!(execution.results[0].png.as_deref(), Some("aWltZw=="));
        assert!(execution.error.is_none());
    }

    #[test]
    fn test_event_stream_error_event() {
        let execution = assemble(&[
            r#"data: {"type":"stderr","text":"warning"}"#,
            r#"data: {"type":"error","name":"ZeroDivisionError","value":"division by zero","traceback":"Traceback..."}"#,
            r#"data: {"type":"end"}"#,
        ]);
        assert!(execution.has_error());
        let err = execution.error.unwrap();
        assert_eq!(err.name, "ZeroDivisionError");
        assert_eq!(err.traceback, "Traceback...");
    }

    #[test]
    fn test_event_stream_skips_malformed_lines() {
        let execution = assemble(&[
            ": keepalive",
            "data: {broken json",
            r#"data: {"type":"stdout","text":"still here"}"#,
            r#"data: {"type":"end"}"#,
        ]);
        assert_eq!(execution.stdout, vec!["still here"]);
    }

    #[test]
    fn test_event_stream_stops_at_end_event() {
        let execution = assemble(&[
            r#"data: {"type":"end"}"#,
            r#"data: {"type":"stdout","text":"after end"}"#,
        ]);
        assert!(execution.stdout.is_empty());
    }

    #[test]
    fn test_event_stream_unknown_event_ignored() {
        let execution = assemble(&[
            r#"data: {"type":"heartbeat"}"#,
            r#"data: {"type":"stdout","text":"ok"}"#,
        ]);
        assert_eq!(execution.stdout, vec!["ok"]);
    }
}
