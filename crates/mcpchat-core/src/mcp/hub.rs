//! Aggregates tools from every connected MCP server.

use rmcp::model::Tool;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use super::client::{joined_text, McpClient};
use super::error::{McpError, McpResult};
use crate::config::{ServerEntry, ServerTransport};
use crate::provider::types::ToolDefinition;

/// Routes tool calls to whichever server advertised the tool.
///
/// When two servers expose the same tool name, the one connected first
/// keeps it and the later duplicate is dropped with a warning.
#[derive(Default)]
pub struct McpHub {
    clients: Vec<McpClient>,
    tools: Vec<Tool>,
    routes: HashMap<String, usize>,
}

impl McpHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to every configured server. A server that fails to start or
    /// to list its tools is logged and skipped; the hub is only an error
    /// when nothing connected.
    pub async fn connect_all(entries: &[ServerEntry]) -> anyhow::Result<Self> {
        let mut hub = Self::new();
        for entry in entries {
            let connected = match &entry.transport {
                ServerTransport::Stdio { command, args, env } => {
                    McpClient::connect_stdio(&entry.name, command, args, env).await
                }
                ServerTransport::Http { url } => McpClient::connect_http(&entry.name, url).await,
            };
            let client = match connected {
                Ok(client) => client,
                Err(e) => {
                    warn!(server = %entry.name, error = %e, "Failed to connect MCP server");
                    continue;
                }
            };
            if let Err(e) = hub.add(client).await {
                warn!(server = %entry.name, error = %e, "Failed to list MCP server tools");
            }
        }

        if hub.clients.is_empty() && !entries.is_empty() {
            anyhow::bail!("none of the {} configured MCP servers could be reached", entries.len());
        }
        Ok(hub)
    }

    /// Register a connected client and index its tools.
    pub async fn add(&mut self, client: McpClient) -> McpResult<()> {
        let index = self.clients.len();
        let listed = client.list_tools().await?;
        let mut added = 0;
        for tool in listed {
            if let Some(&owner) = self.routes.get(&*tool.name) {
                warn!(
                    tool = %tool.name,
                    kept = %self.clients[owner].name(),
                    dropped = %client.name(),
                    "Duplicate tool name, keeping the first server's"
                );
                continue;
            }
            self.routes.insert(tool.name.to_string(), index);
            self.tools.push(tool);
            added += 1;
        }
        info!(server = %client.name(), tools = added, "Registered MCP server tools");
        self.clients.push(client);
        Ok(())
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.routes.contains_key(name)
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.name()).collect()
    }

    /// Tool definitions in the shape the LLM providers expect.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| {
                ToolDefinition::function(
                    &t.name,
                    t.description.as_deref().unwrap_or_default(),
                    Value::Object((*t.input_schema).clone()),
                )
            })
            .collect()
    }

    /// Call a tool and flatten its result to text. A tool-level error is
    /// returned as `Ok` text prefixed with `Error:` so the model can see it.
    pub async fn call(&self, name: &str, arguments: Map<String, Value>) -> McpResult<String> {
        let index = *self
            .routes
            .get(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        let result = self.clients[index].call_tool(name, arguments).await?;
        let text = joined_text(&result.content);
        if result.is_error == Some(true) {
            Ok(format!("Error: {text}"))
        } else {
            Ok(text)
        }
    }

    /// Close every client.
    pub async fn shutdown(self) {
        for client in self.clients {
            client.close().await;
        }
    }
}
