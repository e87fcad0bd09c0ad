pub mod handler;
pub mod history;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod providers;
pub mod sessions;
pub mod summarizer;
pub mod tool_loop;
pub mod tools;

pub use handler::{ProviderHandler, TurnOptions};
pub use history::{ConversationHistory, HistoryEvent, HistoryRecord, HistorySink};
pub use providers::{
    GigaChatProvider, LlmProvider, LlmRequest, LlmResponse, OllamaProvider, OpenRouterProvider,
    ProviderError, SendOptions,
};
pub use sessions::SessionRegistry;
pub use summarizer::Summarizer;
pub use tool_loop::{LoopExit, ToolLoop, ToolLoopOutcome};
pub use tools::{FunctionSchema, ToolDescriptor, ToolHost, parse_arguments, to_function_schema};
