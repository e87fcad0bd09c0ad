use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parley_common::{Error, Result};
use parley_config::McpServerConfig;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParams, RawContent};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{info, warn};

use crate::tools::{ToolDescriptor, ToolHost};

/// Tool host backed by an MCP server running as a child process over stdio.
pub struct McpToolHost {
    name: String,
    service: RunningService<RoleClient, ()>,
    call_timeout: Duration,
}

impl McpToolHost {
    /// Spawn the server and complete the MCP handshake.
    pub async fn connect(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| Error::Mcp(format!("failed to spawn tool host '{name}': {e}")))?;

        let service = tokio::time::timeout(Duration::from_secs(timeout_secs), ().serve(transport))
            .await
            .map_err(|_| {
                Error::Mcp(format!(
                    "tool host '{name}' handshake timed out after {timeout_secs}s"
                ))
            })?
            .map_err(|e| Error::Mcp(format!("tool host '{name}' handshake failed: {e}")))?;

        info!("tool host '{name}' connected");
        Ok(Self {
            name: name.to_string(),
            service,
            call_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub async fn from_config(config: &McpServerConfig) -> Result<Self> {
        Self::connect(
            &config.command,
            &config.command,
            &config.args,
            &config.env,
            config.timeout_secs,
        )
        .await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.service.is_closed()
    }

    /// Stop the server process.
    pub async fn disconnect(self) {
        if let Err(e) = self.service.cancel().await {
            warn!("error stopping tool host '{}': {e}", self.name);
        }
    }
}

#[async_trait]
impl ToolHost for McpToolHost {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let tools = self
            .service
            .list_all_tools()
            .await
            .map_err(|e| Error::Mcp(format!("failed to list tools from '{}': {e}", self.name)))?;

        Ok(tools
            .into_iter()
            .map(|t| {
                let schema = serde_json::to_value(&*t.input_schema).unwrap_or_default();
                ToolDescriptor::from_input_schema(
                    t.name.to_string(),
                    t.description.map(|d| d.to_string()).unwrap_or_default(),
                    schema,
                )
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> Result<String> {
        let params = CallToolRequestParams {
            meta: None,
            task: None,
            name: Cow::Owned(name.to_string()),
            arguments: Some(arguments),
        };

        let result = tokio::time::timeout(self.call_timeout, self.service.call_tool(params))
            .await
            .map_err(|_| {
                Error::Tool(format!(
                    "'{name}' timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Mcp(format!("call to '{name}' failed: {e}")))?;

        let mut text = result
            .content
            .iter()
            .filter_map(|c| match &c.raw {
                RawContent::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            if let Some(structured) = &result.structured_content {
                text = structured.to_string();
            }
        }

        if result.is_error == Some(true) {
            return Err(Error::Tool(text));
        }
        Ok(text)
    }
}
