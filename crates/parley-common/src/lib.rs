pub mod error;
pub mod message;
pub mod types;

pub use error::{Error, Result};
pub use message::{
    FailureKind, Message, Role, TimedResult, ToolCallRequest, ToolCallResult, Usage,
};
pub use types::{ProviderId, SessionId};
