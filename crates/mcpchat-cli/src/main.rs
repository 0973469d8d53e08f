//! mcpchat CLI: interactive chat, the MCP tool server and database utilities.
//!
//! Usage:
//!   mcpchat chat       Start an interactive chat session
//!   mcpchat serve      Run the tool server (stdio or HTTP)
//!   mcpchat tools      List the tools the configured servers offer
//!   mcpchat populate   Fill a table with generated rows
//!   mcpchat onboard    Create a default configuration
//!   mcpchat status     Show current configuration and health
//!   mcpchat sessions   List conversation sessions

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use mcpchat_core::agent::{AgentConfig, AgentLoop, ToolBackend};
use mcpchat_core::config::{Config, ServerEntry, ServerTransport};
use mcpchat_core::db::populate::Populator;
use mcpchat_core::db::Database;
use mcpchat_core::mcp::{McpHub, McpServer};
use mcpchat_core::provider::anthropic::AnthropicProvider;
use mcpchat_core::provider::openai::OpenAiProvider;
use mcpchat_core::provider::{FallbackProvider, LlmProvider};
use mcpchat_core::session::SessionManager;
use mcpchat_core::tools::builtin_registry;

const SERVER_NAME: &str = "mcpchat-tools";
const SERVER_INSTRUCTIONS: &str = "Tools for summarizing and comparing documents, \
     fetching cryptocurrency prices, querying and populating a SQLite database, \
     testing regular expressions and reporting the current date and time.";

#[derive(Parser)]
#[command(
    name = "mcpchat",
    version,
    about = "A tool-calling chat assistant and MCP tool server",
    long_about = "mcpchat: chat with an LLM that can call tools served over the Model Context Protocol.\n\nRun `mcpchat serve` to expose the built-in tools, or `mcpchat chat` to talk to them."
)]
struct Cli {
    /// Config file (default: ~/.mcpchat/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Session name (default: "default")
        #[arg(short, long, default_value = "default")]
        session: String,

        /// Model to use (overrides config)
        #[arg(short, long)]
        model: Option<String>,

        /// Attach a document's content to the first message
        #[arg(short, long)]
        document: Option<PathBuf>,

        /// Run the built-in tools in-process instead of through MCP servers
        #[arg(long)]
        local: bool,
    },

    /// Run the MCP tool server
    Serve {
        #[arg(short, long, value_enum, default_value_t = ServeTransport::Stdio)]
        transport: ServeTransport,

        /// HTTP bind address (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// HTTP port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List the tools available to the assistant
    Tools,

    /// Fill a table with randomly generated rows
    Populate {
        /// Table to populate
        #[arg(short, long)]
        table: String,

        /// Number of rows to generate
        #[arg(short, long, default_value_t = 10)]
        rows: usize,

        /// Database file (overrides config)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Create or reset the default configuration
    Onboard,

    /// Show configuration status and health
    Status,

    /// Manage conversation sessions
    Sessions {
        #[command(subcommand)]
        action: Option<SessionCommands>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ServeTransport {
    Stdio,
    Http,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// List all sessions
    List,
    /// Delete a session
    Delete {
        /// Session key
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout belongs to the protocol when serving over stdio, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone();
    let config_path = config_path.as_deref();

    match cli.command {
        Some(Commands::Chat {
            session,
            model,
            document,
            local,
        }) => {
            cmd_chat(
                config_path,
                &session,
                model.as_deref(),
                document.as_deref(),
                local,
            )
            .await?
        }
        Some(Commands::Serve {
            transport,
            host,
            port,
        }) => cmd_serve(config_path, transport, host, port).await?,
        Some(Commands::Tools) => cmd_tools(config_path).await?,
        Some(Commands::Populate {
            table,
            rows,
            database,
        }) => cmd_populate(config_path, &table, rows, database.as_deref())?,
        Some(Commands::Onboard) => cmd_onboard(config_path)?,
        Some(Commands::Status) => cmd_status(config_path)?,
        Some(Commands::Sessions { action }) => cmd_sessions(config_path, action)?,
        None => cmd_chat(config_path, "default", None, None, false).await?,
    }

    Ok(())
}

// ── Shared Setup ────────────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load_from(p),
        None => Config::load(),
    }
}

fn validate_config(config: &Config) -> Result<()> {
    if let Err(errors) = config.validate() {
        eprintln!("\n  \x1b[31m❌ Configuration errors:\x1b[0m");
        for e in &errors {
            eprintln!("     • {}", e);
        }
        eprintln!();
        anyhow::bail!("Fix the above {} error(s) in config.json", errors.len());
    }
    Ok(())
}

/// Every configured provider, tried in priority order.
fn build_provider(config: &Config, client: &reqwest::Client) -> Result<Arc<dyn LlmProvider>> {
    let active_providers = config.providers.find_all_active();
    if active_providers.is_empty() {
        anyhow::bail!(
            "No LLM provider configured with a real API key. \
             Run `mcpchat onboard` first, then edit config.json"
        );
    }

    let default_model = &config.agents.defaults.model;
    let mut inner_providers = Vec::new();
    for (name, entry) in active_providers {
        let model = entry.model.as_deref().unwrap_or(default_model);
        let provider: Box<dyn LlmProvider> = if name == "anthropic" {
            Box::new(AnthropicProvider::new(
                &entry.api_key,
                entry.api_base.as_deref(),
                model,
                client.clone(),
            ))
        } else {
            Box::new(OpenAiProvider::new(
                name,
                &entry.api_key,
                entry.api_base.as_deref(),
                model,
                client.clone(),
            ))
        };
        inner_providers.push((name.to_string(), provider));
    }

    let provider: Arc<dyn LlmProvider> = Arc::new(FallbackProvider::new(inner_providers));
    Ok(provider)
}

/// The tool server this binary runs when no servers are configured.
fn self_server(config_path: Option<&Path>) -> Result<ServerEntry> {
    let exe = std::env::current_exe().context("Failed to locate the mcpchat executable")?;
    let mut args = Vec::new();
    if let Some(p) = config_path {
        args.push("--config".to_string());
        args.push(p.display().to_string());
    }
    args.extend(["serve".to_string(), "--transport".to_string(), "stdio".to_string()]);

    // Keep the child quiet so its logs don't interleave with the chat.
    let env = HashMap::from([("RUST_LOG".to_string(), "warn".to_string())]);
    Ok(ServerEntry {
        name: SERVER_NAME.to_string(),
        transport: ServerTransport::Stdio {
            command: exe.display().to_string(),
            args,
            env,
        },
    })
}

async fn connect_hub(config: &Config, config_path: Option<&Path>) -> Result<McpHub> {
    let servers = if config.servers.is_empty() {
        info!("No MCP servers configured, starting the built-in tool server");
        vec![self_server(config_path)?]
    } else {
        config.servers.clone()
    };
    McpHub::connect_all(&servers).await
}

// ── Chat Command ────────────────────────────────────────────────────

/// The path argument of a `/doc` command, empty when none was given.
/// Other words that merely start with `/doc` are not commands.
fn doc_argument(input: &str) -> Option<&str> {
    if input == "/doc" {
        return Some("");
    }
    input
        .strip_prefix("/doc")
        .filter(|rest| rest.starts_with(char::is_whitespace))
        .map(str::trim)
}

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn cmd_chat(
    config_path: Option<&Path>,
    session_key: &str,
    model_override: Option<&str>,
    document: Option<&Path>,
    local: bool,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    validate_config(&config)?;
    if let Some(model) = model_override {
        config.agents.defaults.model = model.to_string();
    }

    let client = reqwest::Client::new();
    let provider = build_provider(&config, &client)?;

    let (backend, servers): (Box<dyn ToolBackend>, String) = if local {
        let db = Arc::new(Database::open(&config.database_path())?);
        let registry = builtin_registry(&config, provider.clone(), db);
        (Box::new(registry), "in-process".to_string())
    } else {
        let hub = connect_hub(&config, config_path).await?;
        let names = hub.server_names().join(", ");
        (Box::new(hub), names)
    };

    let agent_config = AgentConfig {
        model: model_override.map(|s| s.to_string()),
        max_tokens: config.agents.defaults.max_tokens,
        temperature: config.agents.defaults.temperature,
        max_iterations: config.agents.defaults.max_tool_iterations,
        system_prompt: config.agents.defaults.system_prompt.clone(),
    };
    let workspace = config.workspace_path();
    let mut agent = AgentLoop::new(provider, backend, agent_config)
        .with_session(SessionManager::new(&workspace), session_key);

    let mut attached = match document {
        Some(path) => Some(read_document(path)?),
        None => None,
    };

    // Print header
    println!();
    println!("  🔧 mcpchat v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Providers: {} | Model: {}",
        config
            .providers
            .find_all_active()
            .iter()
            .map(|(n, _)| *n)
            .collect::<Vec<_>>()
            .join(", "),
        config.agents.defaults.model
    );
    println!(
        "  Session: {} | Tools: {} from {}",
        session_key,
        agent.tool_definitions().len(),
        servers
    );
    if attached.is_some() {
        println!("  Document attached to your first message.");
    }
    println!();
    println!("  Type your message, or /quit to exit. /tools, /doc PATH, /clear, /status");
    println!("  ─────────────────────────────────────");
    println!();

    // Interactive loop
    let stdin = io::stdin();
    loop {
        print!("  \x1b[36m>\x1b[0m ");
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            println!();
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        // Handle commands
        match input {
            "/quit" | "/exit" | "/q" => {
                println!("  Goodbye! 👋");
                break;
            }
            "/clear" => {
                agent.reset()?;
                attached = None;
                println!("  Session cleared.");
                continue;
            }
            "/tools" => {
                for def in agent.tool_definitions() {
                    println!("  🔧 {}: {}", def.function.name, def.function.description);
                }
                println!();
                continue;
            }
            "/status" => {
                let usage = agent.usage();
                println!(
                    "  Messages: {} | Tokens: {} prompt, {} completion | Document: {}",
                    agent.transcript().len(),
                    usage.prompt_tokens,
                    usage.completion_tokens,
                    if attached.is_some() { "attached" } else { "none" }
                );
                println!();
                continue;
            }
            _ => {}
        }

        if let Some(path) = doc_argument(input) {
            if path.is_empty() {
                println!("  Usage: /doc PATH");
                continue;
            }
            match read_document(Path::new(path)) {
                Ok(content) => {
                    println!("  Attached {} ({} bytes) to your next message.", path, content.len());
                    attached = Some(content);
                }
                Err(e) => eprintln!("  \x1b[31mError: {:#}\x1b[0m", e),
            }
            continue;
        }

        println!();
        match agent.process(input, attached.as_deref()).await {
            Ok(response) => {
                attached = None;
                println!("  \x1b[32m{}\x1b[0m\n", response);
            }
            Err(e) => {
                eprintln!("  \x1b[31mError: {:#}\x1b[0m\n", e);
            }
        }
    }

    Ok(())
}

// ── Serve Command ───────────────────────────────────────────────────

async fn cmd_serve(
    config_path: Option<&Path>,
    transport: ServeTransport,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let config = load_config(config_path)?;
    validate_config(&config)?;

    let client = reqwest::Client::new();
    let provider = build_provider(&config, &client)?;
    let db = Arc::new(Database::open(&config.database_path())?);
    let server = McpServer::new(SERVER_NAME, builtin_registry(&config, provider, db))
        .with_instructions(SERVER_INSTRUCTIONS);

    match transport {
        ServeTransport::Stdio => server.serve_stdio().await?,
        ServeTransport::Http => {
            let host = host.unwrap_or_else(|| config.serve.host.clone());
            let port = port.unwrap_or(config.serve.port);
            let addr: SocketAddr = format!("{host}:{port}")
                .parse()
                .with_context(|| format!("Invalid bind address {host}:{port}"))?;
            server.serve_http(addr).await?;
        }
    }
    Ok(())
}

// ── Tools Command ───────────────────────────────────────────────────

async fn cmd_tools(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let hub = connect_hub(&config, config_path).await?;

    println!();
    println!("  Servers: {}", hub.server_names().join(", "));
    println!("  ─────────────────────────────────────");
    for tool in hub.tools() {
        println!("  🔧 {}", tool.name);
        if let Some(ref description) = tool.description {
            println!("     {}", description);
        }
    }
    println!();

    hub.shutdown().await;
    Ok(())
}

// ── Populate Command ────────────────────────────────────────────────

fn cmd_populate(
    config_path: Option<&Path>,
    table: &str,
    rows: usize,
    database: Option<&Path>,
) -> Result<()> {
    let path = match database {
        Some(p) => p.to_path_buf(),
        None => load_config(config_path)?.database_path(),
    };
    let db = Database::open(&path)?;
    let report = Populator::new(&db).populate_table(table, rows)?;

    match report.statement {
        Some(ref sql) => {
            println!("{}", sql);
            println!();
            println!("  ✅ Inserted {} rows into {}", report.rows, report.table);
        }
        None => println!("  Nothing to insert."),
    }
    Ok(())
}

// ── Onboard Command ─────────────────────────────────────────────────

fn cmd_onboard(config_path: Option<&Path>) -> Result<()> {
    let path = Config::write_default_template(config_path)?;
    println!();
    println!("  ✅ Configuration created at:");
    println!("     {}", path.display());
    println!();
    println!("  Next steps:");
    println!("  1. Set ANTHROPIC_API_KEY or edit the config file and add your API key");
    println!("  2. Run `mcpchat populate --table <name>` to seed a demo database");
    println!("  3. Run `mcpchat chat` to start chatting");
    println!();
    Ok(())
}

// ── Status Command ──────────────────────────────────────────────────

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    println!();
    println!("  🔧 mcpchat status");
    println!("  ─────────────────────────────────────");

    // Config file
    if path.exists() {
        println!("  Config:    {}", path.display());
    } else {
        println!("  Config:    ❌ Not found (run `mcpchat onboard`)");
        return Ok(());
    }
    let config = Config::load_from(&path)?;

    // Provider
    match config.providers.find_active() {
        Some((name, _)) => println!("  Provider:  ✅ {} configured", name),
        None => println!("  Provider:  ❌ No provider configured"),
    }

    // Model
    println!("  Model:     {}", config.agents.defaults.model);

    // Servers
    if config.servers.is_empty() {
        println!("  Servers:   built-in (spawned on demand)");
    } else {
        for server in &config.servers {
            let target = match &server.transport {
                ServerTransport::Stdio { command, .. } => format!("stdio: {}", command),
                ServerTransport::Http { url } => format!("http: {}", url),
            };
            println!("  Server:    {} ({})", server.name, target);
        }
    }

    // Database
    let db_path = config.database_path();
    if db_path.exists() {
        match Database::open(&db_path).and_then(|db| db.tables()) {
            Ok(tables) => println!("  Database:  {} ✅ {} tables", db_path.display(), tables.len()),
            Err(e) => {
                warn!(error = %e, "Failed to inspect database");
                println!("  Database:  {} ❌ unreadable", db_path.display());
            }
        }
    } else {
        println!("  Database:  {} ⚠️  (will be created)", db_path.display());
    }

    // Workspace
    let ws = config.workspace_path();
    println!(
        "  Workspace: {} {}",
        ws.display(),
        if ws.exists() { "✅" } else { "⚠️  (will be created)" }
    );

    // Sessions
    let mgr = SessionManager::new(&ws);
    println!("  Sessions:  {} saved", mgr.list_sessions().len());

    if let Err(errors) = config.validate() {
        println!();
        for e in errors {
            println!("  ⚠️  {}", e);
        }
    }

    println!();
    Ok(())
}

// ── Session Commands ────────────────────────────────────────────────

fn cmd_sessions(config_path: Option<&Path>, action: Option<SessionCommands>) -> Result<()> {
    let config = load_config(config_path)?;
    let ws = config.workspace_path();
    let mut mgr = SessionManager::new(&ws);

    match action {
        Some(SessionCommands::Delete { key }) => {
            if mgr.delete(&key) {
                println!("  ✅ Session deleted: {}", key);
            } else {
                println!("  ❌ Session not found: {}", key);
            }
        }
        Some(SessionCommands::List) | None => {
            let sessions = mgr.list_sessions();
            if sessions.is_empty() {
                println!("  No saved sessions.");
            } else {
                println!();
                for (key, updated) in sessions {
                    println!("  📝 {} (updated: {})", key, updated);
                }
                println!();
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_doc_argument() {
        assert_eq!(doc_argument("/doc"), Some(""));
        assert_eq!(doc_argument("/doc  notes.txt "), Some("notes.txt"));
        assert_eq!(doc_argument("/docs"), None);
        assert_eq!(doc_argument("/document notes.txt"), None);
        assert_eq!(doc_argument("hello /doc x"), None);
    }

    #[test]
    fn test_parse_serve_http() {
        let cli = Cli::try_parse_from(["mcpchat", "serve", "--transport", "http", "--port", "9000"])
            .unwrap();
        match cli.command {
            Some(Commands::Serve { transport, port, host }) => {
                assert!(transport == ServeTransport::Http);
                assert_eq!(port, Some(9000));
                assert!(host.is_none());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_global_config_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["mcpchat", "populate", "-t", "orders", "--config", "/tmp/c.json"])
            .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.json")));
        match cli.command {
            Some(Commands::Populate { table, rows, database }) => {
                assert_eq!(table, "orders");
                assert_eq!(rows, 10);
                assert!(database.is_none());
            }
            _ => panic!("expected populate"),
        }
    }

    #[test]
    fn test_self_server_forwards_config() {
        let entry = self_server(Some(Path::new("/tmp/c.json"))).unwrap();
        match entry.transport {
            ServerTransport::Stdio { args, env, .. } => {
                assert_eq!(args, ["--config", "/tmp/c.json", "serve", "--transport", "stdio"]);
                assert_eq!(env.get("RUST_LOG").map(String::as_str), Some("warn"));
            }
            ServerTransport::Http { .. } => panic!("expected stdio"),
        }
    }
}
