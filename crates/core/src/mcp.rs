//! MCP-backed dispatcher.
//!
//! Forwards function calls to an MCP tool server through an `rmcp` client.
//! The transport is the caller's choice: an in-process duplex pipe, a child
//! process, anything `rmcp` can serve over.

use crate::dispatcher::{DispatchError, FunctionDispatcher, FunctionSchema};
use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, JsonObject, RawContent},
    service::{RoleClient, RunningService},
};
use tracing::info;

pub struct McpDispatcher {
    client: RunningService<RoleClient, ()>,
}

impl McpDispatcher {
    /// Wraps an already-initialized MCP client session.
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FunctionDispatcher for McpDispatcher {
    async fn dispatch(&self, name: &str, arguments: &str) -> Result<String, DispatchError> {
        let arguments = if arguments.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<JsonObject>(arguments)
                    .map_err(DispatchError::InvalidArguments)?,
            )
        };

        info!(tool = %name, "Forwarding function call to MCP tool server");
        let result = self
            .client
            .peer()
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let text = result
            .content
            .unwrap_or_default()
            .into_iter()
            .filter_map(|content| match content.raw {
                RawContent::Text(text_content) => Some(text_content.text),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error.unwrap_or(false) {
            return Err(DispatchError::Failed {
                name: name.to_string(),
                message: text,
            });
        }
        Ok(text)
    }

    async fn schemas(&self) -> Result<Vec<FunctionSchema>, DispatchError> {
        let tools = self
            .client
            .list_all_tools()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        tools
            .into_iter()
            .map(|tool| {
                Ok(FunctionSchema {
                    name: tool.name.to_string(),
                    description: tool
                        .description
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    parameters: serde_json::to_value(&*tool.input_schema)
                        .map_err(|e| DispatchError::Transport(e.to_string()))?,
                })
            })
            .collect()
    }
}
