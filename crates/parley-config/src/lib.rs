pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, HistoryConfig, LlmProviderConfig, LoggingConfig, McpServerConfig, ProvidersConfig,
    ToolsConfig,
};
