//! MCP client: one connected server and the calls made against it.

use rmcp::model::{CallToolRequestParams, CallToolResult, Content, RawContent, Tool};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::error::{McpError, McpResult};

/// A server that completed the `initialize` handshake.
pub struct McpClient {
    name: String,
    service: RunningService<RoleClient, ()>,
}

impl McpClient {
    pub fn new(name: &str, service: RunningService<RoleClient, ()>) -> Self {
        if let Some(info) = service.peer_info() {
            info!(
                server = name,
                remote = %info.server_info.name,
                version = %info.server_info.version,
                "Connected to MCP server"
            );
        }
        Self {
            name: name.to_string(),
            service,
        }
    }

    /// Spawn `command args...` and speak MCP over its stdin/stdout.
    /// The child's stderr stays attached to ours.
    pub async fn connect_stdio(
        name: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> McpResult<Self> {
        debug!(server = name, command, ?args, "Spawning MCP server");
        let mut cmd = Command::new(command);
        cmd.args(args).envs(env);
        let transport = TokioChildProcess::new(cmd)?;
        let service = ().serve(transport).await.map_err(|e| handshake(name, e))?;
        Ok(Self::new(name, service))
    }

    /// Connect to a streamable-HTTP endpoint.
    pub async fn connect_http(name: &str, url: &str) -> McpResult<Self> {
        debug!(server = name, url, "Connecting to MCP server over HTTP");
        let transport = StreamableHttpClientTransport::from_uri(url.to_string());
        let service = ().serve(transport).await.map_err(|e| handshake(name, e))?;
        Ok(Self::new(name, service))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Every tool the server offers, across all `tools/list` pages.
    pub async fn list_tools(&self) -> McpResult<Vec<Tool>> {
        Ok(self.service.list_all_tools().await?)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<CallToolResult> {
        let params = CallToolRequestParams::new(name.to_string()).with_arguments(arguments);
        Ok(self.service.call_tool(params).await?)
    }

    /// Stop the service. A spawned server sees its stdin close and exits.
    pub async fn close(self) {
        match self.service.cancel().await {
            Ok(reason) => debug!(server = %self.name, ?reason, "MCP client closed"),
            Err(e) => warn!(server = %self.name, error = %e, "MCP client task failed while closing"),
        }
    }
}

fn handshake(server: &str, e: impl std::fmt::Display) -> McpError {
    McpError::Handshake {
        server: server.to_string(),
        message: e.to_string(),
    }
}

/// Join every text block with newlines. Images, audio and embedded
/// resources are skipped.
pub fn joined_text(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_joined_text_skips_non_text_blocks() {
        let content: Vec<Content> = serde_json::from_value(json!([
            {"type": "text", "text": "first"},
            {"type": "resource", "resource": {"uri": "file:///notes.txt", "text": "hidden"}},
            {"type": "image", "data": "aGk=", "mimeType": "image/png"},
            {"type": "text", "text": "second"}
        ]))
        .unwrap();
        assert_eq!(joined_text(&content), "first\nsecond");
    }

    #[test]
    fn test_call_result_with_resource_block_still_parses() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "resource", "resource": {"uri": "mem://1", "text": "blob"}},
                {"type": "text", "text": "price is 42"}
            ],
            "isError": false
        }))
        .unwrap();
        assert_eq!(joined_text(&result.content), "price is 42");
    }

    #[tokio::test]
    async fn test_connect_stdio_missing_binary() {
        let err = McpClient::connect_stdio(
            "ghost",
            "/nonexistent/mcpchat-missing-server",
            &[],
            &HashMap::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::Io(_)));
    }
}
