//! Model Context Protocol plumbing, built on the `rmcp` SDK.
//!
//! - [`client`]: one connected server (child process or streamable HTTP)
//! - [`hub`]: routes tool calls across several connected servers
//! - [`server`]: exposes a [`ToolRegistry`](crate::tools::ToolRegistry) over stdio or HTTP

pub mod client;
pub mod error;
pub mod hub;
pub mod server;

pub use client::McpClient;
pub use error::{McpError, McpResult};
pub use hub::McpHub;
pub use server::McpServer;
