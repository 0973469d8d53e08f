//! MCP tool server.
//!
//! [`McpServer`] is an `rmcp` [`ServerHandler`] over a [`ToolRegistry`].
//! The same handler is served on stdio and, per session, behind the
//! streamable-HTTP endpoint at `/mcp`.

use axum::Router;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::RequestContext;
use rmcp::transport::stdio;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use rmcp::{ErrorData, RoleServer, ServerHandler, ServiceExt};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::tools::ToolRegistry;

#[derive(Clone)]
pub struct McpServer {
    name: String,
    instructions: Option<String>,
    tools: Arc<ToolRegistry>,
}

impl McpServer {
    pub fn new(name: &str, tools: ToolRegistry) -> Self {
        Self {
            name: name.to_string(),
            instructions: None,
            tools: Arc::new(tools),
        }
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.instructions = Some(instructions.to_string());
        self
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The registry as MCP tool descriptors, sorted by name.
    fn tool_list(&self) -> Vec<Tool> {
        self.tools
            .definitions()
            .into_iter()
            .map(|def| {
                let schema = match def.function.parameters {
                    Value::Object(map) => map,
                    _ => Map::new(),
                };
                Tool::new(def.function.name, def.function.description, Arc::new(schema))
            })
            .collect()
    }

    /// Serve on this process's stdin/stdout until the client disconnects.
    pub async fn serve_stdio(self) -> anyhow::Result<()> {
        info!(server = %self.name, tools = self.tools.len(), "Serving MCP over stdio");
        let running = self
            .serve(stdio())
            .await
            .map_err(|e| anyhow::anyhow!("MCP handshake failed: {e}"))?;
        let reason = running.waiting().await?;
        debug!(?reason, "MCP client disconnected");
        Ok(())
    }

    /// Serve the streamable-HTTP endpoint until Ctrl+C.
    pub async fn serve_http(self, addr: SocketAddr) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(
            server = %self.name,
            addr = %listener.local_addr()?,
            tools = self.tools.len(),
            "Serving MCP over HTTP at /mcp"
        );
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down HTTP server");
            })
            .await?;
        Ok(())
    }

    /// An axum router with the MCP endpoint mounted at `/mcp`.
    pub fn router(&self) -> Router {
        let server = self.clone();
        let service = StreamableHttpService::new(
            move || Ok(server.clone()),
            Arc::new(LocalSessionManager::default()),
            StreamableHttpServerConfig::default(),
        );
        Router::new().nest_service("/mcp", service)
    }
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        let mut server_info = Implementation::default();
        server_info.name = self.name.clone();
        server_info.version = env!("CARGO_PKG_VERSION").into();
        let mut info = ServerInfo::default();
        info.instructions = self.instructions.clone();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.server_info = server_info;
        info
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.tool_list()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        if !self.tools.has(&request.name) {
            return Err(ErrorData::invalid_params(
                format!("unknown tool: {}", request.name),
                None,
            ));
        }

        let args: HashMap<String, Value> =
            request.arguments.unwrap_or_default().into_iter().collect();
        match self.tools.execute(&request.name, args).await {
            Ok(text) => Ok(CallToolResult::success(vec![Content::text(text)])),
            Err(e) => {
                warn!(tool = %request.name, error = %e, "Tool execution failed");
                Ok(CallToolResult::error(vec![Content::text(format!("{e:#}"))]))
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{connect_in_memory, upper_server};
    use super::*;
    use crate::mcp::client::joined_text;
    use crate::mcp::{McpClient, McpError};
    use serde_json::json;

    fn text_args(text: &str) -> Map<String, Value> {
        let mut args = Map::new();
        args.insert("text".into(), json!(text));
        args
    }

    #[test]
    fn test_tool_list_mirrors_registry() {
        let tools = upper_server("s", "").tool_list();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "upper");
        assert_eq!(tools[0].description.as_deref(), Some("Uppercase text"));
        assert_eq!(tools[0].input_schema["required"], json!(["text"]));
    }

    #[test]
    fn test_server_info() {
        let info = upper_server("test-server", "")
            .with_instructions("be nice")
            .get_info();
        assert_eq!(info.server_info.name, "test-server");
        assert_eq!(info.instructions.as_deref(), Some("be nice"));
        assert!(info.capabilities.tools.is_some());
    }

    #[tokio::test]
    async fn test_round_trip_over_pipe() {
        let client = connect_in_memory("local", upper_server("test-server", "")).await;

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "upper");

        let result = client.call_tool("upper", text_args("hello")).await.unwrap();
        assert_ne!(result.is_error, Some(true));
        assert_eq!(joined_text(&result.content), "HELLO");

        client.close().await;
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let client = connect_in_memory("local", upper_server("s", "")).await;
        let result = client.call_tool("upper", Map::new()).await.unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(joined_text(&result.content).contains("'text' parameter is required"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let client = connect_in_memory("local", upper_server("s", "")).await;
        let err = client.call_tool("nope", Map::new()).await.unwrap_err();
        assert!(matches!(err, McpError::Service(_)));
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_http_round_trip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = upper_server("http-server", "").router();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = McpClient::connect_http("remote", &format!("http://{addr}/mcp"))
            .await
            .unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "upper");

        let result = client.call_tool("upper", text_args("over http")).await.unwrap();
        assert_eq!(joined_text(&result.content), "OVER HTTP");
        client.close().await;
    }
}
