use thiserror::Error;

/// Errors raised while talking to MCP servers.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to start MCP server: {0}")]
    Io(#[from] std::io::Error),

    /// The `initialize` exchange did not complete.
    #[error("MCP handshake with '{server}' failed: {message}")]
    Handshake { server: String, message: String },

    #[error("MCP request failed: {0}")]
    Service(#[from] rmcp::service::ServiceError),

    #[error("no connected server provides tool '{0}'")]
    UnknownTool(String),
}

pub type McpResult<T> = Result<T, McpError>;
