use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Cloud backends answer quickly; generation on local hardware is much slower.
pub const DEFAULT_CLOUD_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 300;

pub const DEFAULT_SUMMARIZE_THRESHOLD: usize = 10;
pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 5;

pub const DEFAULT_SUMMARY_PROMPT: &str = "Summarize the conversation above in a few sentences. \
     Preserve key facts, names, numbers, decisions and open questions. \
     Reply with the summary only.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub providers: ProvidersConfig,
    pub history: HistoryConfig,
    pub tools: ToolsConfig,
    pub mcp: Option<McpServerConfig>,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Provider used when the caller does not name one.
    pub default: Option<String>,
    pub gigachat: Option<LlmProviderConfig>,
    pub openrouter: Option<LlmProviderConfig>,
    pub ollama: Option<LlmProviderConfig>,
}

/// Connection settings for one backend. Read once when its client is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmProviderConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    /// Bearer credential. Obtaining and refreshing it is the caller's job.
    pub api_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Non-summary messages allowed before the next turn compacts the history.
    pub summarize_threshold: usize,
    pub summary_prompt: String,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            summarize_threshold: DEFAULT_SUMMARIZE_THRESHOLD,
            summary_prompt: DEFAULT_SUMMARY_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    pub max_iterations: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }
}

/// How to launch the tool host process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
