use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    /// One of: openai, groq, anthropic, gemini, bedrock.
    pub provider: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SandboxConfig {
    pub base_url: String,
    pub template: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    pub max_turns: usize,
    pub artifacts_dir: String,
    pub streaming: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: "openai".to_string(),
                model: "gpt-4o".to_string(),
                base_url: "https://api.openai.com".to_string(),
            },
            sandbox: SandboxConfig {
                base_url: "http://localhost:49982".to_string(),
                template: "python-data-science".to_string(),
                timeout_secs: 300,
            },
            agent: AgentConfig {
                max_turns: 10,
                artifacts_dir: "./artifacts".to_string(),
                streaming: true,
            },
        }
    }
}

/// Default API base URL for a provider name. The Bedrock runtime endpoint
/// is per-region; AWS_REGION picks it, falling back to us-east-1.
pub fn default_base_url(provider: &str) -> String {
    match provider {
        "groq" => "https://api.groq.com/openai".to_string(),
        "anthropic" => "https://api.anthropic.com".to_string(),
        "gemini" => "https://generativelanguage.googleapis.com".to_string(),
        "bedrock" => {
            let region =
                std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
            format!("https://bedrock-runtime.{}.amazonaws.com", region)
        }
        _ => "https://api.openai.com".to_string(),
    }
}

/// Environment variable holding the API key for a provider name.
pub fn api_key_env(provider: &str) -> &'static str {
    match provider {
        "groq" => "GROQ_API_KEY",
        "anthropic" => "ANTHROPIC_API_KEY",
        "gemini" => "GEMINI_API_KEY",
        "bedrock" => "AWS_BEARER_TOKEN_BEDROCK",
        _ => "OPENAI_API_KEY",
    }
}

impl Config {
    /// Parse config from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Load config from ~/.sandbar/config.toml, falling back to defaults.
    /// API keys never live in the file — they come from the environment.
    pub fn load() -> Self {
        let config_path = if let Some(home) = dirs::home_dir() {
            home.join(".sandbar").join("config.toml")
        } else {
            return Self::default();
        };

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        eprintln!(
                            "Warning: Failed to parse {}: {}. Using defaults.",
                            config_path.display(),
                            e
                        );
                        Self::default()
                    }
                },
                Err(e) => {
                    eprintln!(
                        "Warning: Failed to read {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// The provider API key from the environment, if set.
    pub fn provider_api_key(&self) -> Option<String> {
        std::env::var(api_key_env(&self.llm.provider)).ok()
    }

    /// The sandbox service API key from the environment, if set.
    pub fn sandbox_api_key(&self) -> Option<String> {
        std::env::var("SANDBAR_API_KEY").ok()
    }
}
