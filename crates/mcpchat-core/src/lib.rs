//! mcpchat-core: building blocks for a tool-calling chat assistant.
//!
//! - [`config`]: typed configuration loaded from JSON
//! - [`provider`]: LLM provider trait, OpenAI-compatible and Anthropic backends
//! - [`mcp`]: Model Context Protocol client hub and tool server (on `rmcp`)
//! - [`tools`]: tool trait, registry and the built-in tool set
//! - [`db`]: SQLite access, schema catalog and fake-data populator
//! - [`session`]: transcript persistence (JSONL)
//! - [`agent`]: the tool-dispatch loop
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use mcpchat_core::agent::{AgentConfig, AgentLoop};
//! use mcpchat_core::config::Config;
//! use mcpchat_core::mcp::McpHub;
//! use mcpchat_core::provider::anthropic::AnthropicProvider;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let (_, entry) = config.providers.find_active().ok_or_else(|| anyhow::anyhow!("no provider"))?;
//! let provider = AnthropicProvider::new(
//!     &entry.api_key,
//!     None,
//!     &config.agents.defaults.model,
//!     reqwest::Client::new(),
//! );
//!
//! let hub = McpHub::connect_all(&config.servers).await?;
//! let agent_config = AgentConfig {
//!     model: None,
//!     max_tokens: config.agents.defaults.max_tokens,
//!     temperature: config.agents.defaults.temperature,
//!     max_iterations: config.agents.defaults.max_tool_iterations,
//!     system_prompt: config.agents.defaults.system_prompt.clone(),
//! };
//!
//! let mut agent = AgentLoop::new(Arc::new(provider), Box::new(hub), agent_config);
//! let reply = agent.process("What is the bitcoin price?", None).await?;
//! println!("{reply}");
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod db;
pub mod mcp;
pub mod provider;
pub mod session;
pub mod tools;
