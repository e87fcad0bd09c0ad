use async_trait::async_trait;
use parley_common::Result;
use serde_json::{Map, Value};

use super::ToolDescriptor;

/// Something that can list tools and run them by name.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Run `name` and return its textual result.
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String>;
}
