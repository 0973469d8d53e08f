//! Tool system: trait, registry, and the built-in tool set.
//!
//! Every tool implements the `Tool` trait and registers itself in the
//! `ToolRegistry`. The MCP server advertises the registry over the wire;
//! `chat --local` hands it straight to the agent loop.

pub mod compare;
pub mod database;
pub mod datetime;
pub mod price;
pub mod regex_test;
pub mod summarize;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::Config;
use crate::db::Database;
use crate::provider::types::ToolDefinition;
use crate::provider::LlmProvider;

/// Trait that all tools must implement.
///
/// Each tool declares its name, description, JSON Schema parameters, and
/// an async `execute` method. Failures are returned as `Err` and surface
/// to the caller as tool errors, never as a crashed server.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name used in function calls (e.g., "test_regex").
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String>;
}

/// Dynamic registry of tools, looked up by name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        debug!(tool = tool.name(), "Registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Execute a tool by name with the given arguments.
    pub async fn execute(&self, name: &str, args: HashMap<String, Value>) -> anyhow::Result<String> {
        match self.tools.get(name) {
            Some(tool) => {
                debug!(tool = name, "Executing tool");
                tool.execute(args).await
            }
            None => {
                error!(tool = name, "Tool not found");
                anyhow::bail!("Tool '{}' not found", name)
            }
        }
    }

    /// All tool definitions in function-calling format, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.sorted()
            .into_iter()
            .map(|tool| ToolDefinition::function(tool.name(), tool.description(), tool.parameters()))
            .collect()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn sorted(&self) -> Vec<&dyn Tool> {
        let mut tools: Vec<&dyn Tool> = self.tools.values().map(|t| t.as_ref()).collect();
        tools.sort_by(|a, b| a.name().cmp(b.name()));
        tools
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the standard tool set from config.
///
/// `provider` backs the tools that ask a model for help (summaries,
/// comparisons, SQL generation).
pub fn builtin_registry(
    config: &Config,
    provider: Arc<dyn LlmProvider>,
    database: Arc<Database>,
) -> ToolRegistry {
    let model = config.agents.defaults.model.clone();
    let summarizer = config.tools.summarizer.clone();

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(summarize::SummarizeDocumentTool::new(
        provider.clone(),
        &model,
        summarizer.clone(),
    )));
    registry.register(Box::new(compare::CompareDocumentsTool::new(
        provider.clone(),
        &model,
        summarizer,
    )));
    registry.register(Box::new(price::FetchPriceTool::new(config.tools.price.clone())));
    registry.register(Box::new(regex_test::TestRegexTool));
    registry.register(Box::new(datetime::CurrentDateTimeTool::new(
        config.tools.clock.hour24,
    )));
    registry.register(Box::new(database::QueryDatabaseTool::new(
        provider,
        &model,
        database.clone(),
        config.tools.database.clone(),
    )));
    registry.register(Box::new(database::PopulateDatabaseTool::new(database.clone())));
    registry.register(Box::new(database::ListTablesTool::new(database)));
    registry
}

// ── Argument helpers ────────────────────────────────────────────────

/// A required string argument.
pub(crate) fn str_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> anyhow::Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("'{}' parameter is required", key))
}

/// An optional, non-empty string argument.
pub(crate) fn opt_str_arg<'a>(args: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// An optional unsigned integer argument. Numeric strings are accepted
/// since models sometimes quote numbers.
pub(crate) fn opt_u64_arg(args: &HashMap<String, Value>, key: &str) -> Option<u64> {
    match args.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text between `<tag>` and `</tag>`, trimmed. Falls back to the whole
/// reply when the opening tag is missing.
pub(crate) fn extract_tagged<'a>(text: &'a str, tag: &str) -> &'a str {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    match text.find(&open) {
        Some(start) => {
            let rest = &text[start + open.len()..];
            let end = rest.find(&close).unwrap_or(rest.len());
            rest[..end].trim()
        }
        None => text.trim(),
    }
}
