//! Configuration module for mcpchat.
//!
//! Loads typed configuration from `~/.mcpchat/config.json`.
//! All fields use `serde` defaults, so a partial file is always valid JSON
//! config; `validate()` reports what is still missing before a chat starts.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Prefix marking a secret that should be read from the environment.
const ENV_PREFIX: &str = "env:";

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub agents: AgentsConfig,
    pub servers: Vec<ServerEntry>,
    pub tools: ToolsConfig,
    pub serve: ServeConfig,
}

impl Config {
    /// Load configuration from the default path (`~/.mcpchat/config.json`).
    ///
    /// A missing file yields the defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string and resolve `env:` secrets.
    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let mut config: Config = serde_json::from_str(content)?;
        config.providers.resolve_env();
        Ok(config)
    }

    /// Get the default config file path.
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    /// Get the default config directory path.
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mcpchat")
    }

    /// Get the resolved workspace path.
    pub fn workspace_path(&self) -> PathBuf {
        expand_home(&self.agents.defaults.workspace)
    }

    /// Get the resolved database path for the SQL tools.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.tools.database.path)
    }

    /// Write the default config template to `path`, or the default path.
    pub fn write_default_template(path: Option<&Path>) -> anyhow::Result<PathBuf> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = serde_json::json!({
            "providers": {
                "anthropic": {
                    "apiKey": "env:ANTHROPIC_API_KEY"
                }
            },
            "agents": {
                "defaults": {
                    "model": "claude-3-5-sonnet-20240620"
                }
            },
            "servers": [],
            "tools": {
                "database": { "path": "~/.mcpchat/workspace/demo.db" }
            }
        });

        std::fs::write(&path, serde_json::to_string_pretty(&template)?)?;
        Ok(path)
    }

    /// Validate the configuration and return every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.providers.find_active().is_none() {
            errors.push(
                "No LLM provider configured with a real API key. \
                 Edit config.json and replace the placeholder key."
                    .into(),
            );
        }

        if self.agents.defaults.model.is_empty() {
            errors.push("agents.defaults.model is empty. Specify a model name.".into());
        }

        if self.agents.defaults.max_tool_iterations == 0 {
            errors.push("agents.defaults.maxToolIterations must be at least 1.".into());
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                errors.push("Every entry in servers needs a name.".into());
            } else if !seen.insert(server.name.as_str()) {
                errors.push(format!("Duplicate server name '{}'.", server.name));
            }
            match &server.transport {
                ServerTransport::Stdio { command, .. } if command.is_empty() => {
                    errors.push(format!("Server '{}' has an empty command.", server.name));
                }
                ServerTransport::Http { url } if !url.starts_with("http") => {
                    errors.push(format!("Server '{}' url must be http(s).", server.name));
                }
                _ => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\")) {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest)
    } else {
        PathBuf::from(raw)
    }
}

/// Resolve an `env:NAME` reference; other values pass through unchanged.
/// An unset variable resolves to the empty string.
fn resolve_secret(raw: &str) -> String {
    match raw.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var.trim()).unwrap_or_default(),
        None => raw.to_string(),
    }
}

// ── Provider Configuration ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderEntry {
    pub api_key: String,
    pub api_base: Option<String>,
    /// Per-provider model override.
    pub model: Option<String>,
}

impl ProviderEntry {
    fn is_usable(&self) -> bool {
        !self.api_key.is_empty() && !self.api_key.contains("YOUR_")
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub anthropic: Option<ProviderEntry>,
    pub openrouter: Option<ProviderEntry>,
    pub openai: Option<ProviderEntry>,
    pub deepseek: Option<ProviderEntry>,
    pub groq: Option<ProviderEntry>,
    pub gemini: Option<ProviderEntry>,
    pub vllm: Option<ProviderEntry>,
}

impl ProvidersConfig {
    fn candidates(&self) -> [(&'static str, &Option<ProviderEntry>); 7] {
        [
            ("anthropic", &self.anthropic),
            ("openrouter", &self.openrouter),
            ("openai", &self.openai),
            ("deepseek", &self.deepseek),
            ("groq", &self.groq),
            ("gemini", &self.gemini),
            ("vllm", &self.vllm),
        ]
    }

    /// Find the first configured provider (has a non-placeholder API key).
    pub fn find_active(&self) -> Option<(&'static str, &ProviderEntry)> {
        self.find_all_active().into_iter().next()
    }

    /// All configured providers in priority order.
    pub fn find_all_active(&self) -> Vec<(&'static str, &ProviderEntry)> {
        self.candidates()
            .into_iter()
            .filter_map(|(name, entry)| entry.as_ref().map(|e| (name, e)))
            .filter(|(_, e)| e.is_usable())
            .collect()
    }

    fn resolve_env(&mut self) {
        for entry in [
            &mut self.anthropic,
            &mut self.openrouter,
            &mut self.openai,
            &mut self.deepseek,
            &mut self.groq,
            &mut self.gemini,
            &mut self.vllm,
        ]
        .into_iter()
        .flatten()
        {
            entry.api_key = resolve_secret(&entry.api_key);
        }
    }
}

// ── Agent Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentDefaults {
    pub workspace: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_tool_iterations: u32,
    pub system_prompt: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            workspace: "~/.mcpchat/workspace".into(),
            model: "claude-3-5-sonnet-20240620".into(),
            max_tokens: 2048,
            temperature: 0.7,
            max_tool_iterations: 10,
            system_prompt: "You are a helpful assistant with access to tools. \
                            Call a tool whenever it helps answer the user's request."
                .into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub defaults: AgentDefaults,
}

// ── MCP Server Configuration ────────────────────────────────────────

/// A tool server the chat client connects to.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEntry {
    pub name: String,
    #[serde(flatten)]
    pub transport: ServerTransport,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum ServerTransport {
    /// Spawn `command args...` and speak MCP over its stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// POST JSON-RPC messages to `url`.
    Http { url: String },
}

// ── Tools Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub price: PriceConfig,
    pub database: DatabaseConfig,
    pub summarizer: SummarizerConfig,
    pub clock: ClockConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PriceConfig {
    pub api_base: String,
    pub default_coin: String,
    pub default_currency: String,
    pub timeout_seconds: u64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.coingecko.com/api/v3".into(),
            default_coin: "bitcoin".into(),
            default_currency: "usd".into(),
            timeout_seconds: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub path: String,
    /// Statements containing any of these words are refused.
    pub blocked_keywords: Vec<String>,
    /// Maximum rows returned by a query.
    pub max_rows: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.mcpchat/workspace/demo.db".into(),
            blocked_keywords: ["DROP", "DELETE", "TRUNCATE", "UPDATE", "INSERT", "ALTER"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_rows: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SummarizerConfig {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClockConfig {
    pub hour24: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { hour24: true }
    }
}

// ── Serve Configuration ─────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5553,
        }
    }
}
