//! Agent loop: the tool-dispatch engine.
//!
//! The loop:
//! 1. Appends the user turn (plus any attached document) to the transcript
//! 2. Calls the LLM with the system prompt, the transcript and the tool list
//! 3. If the LLM returns tool calls → runs each one in order → appends the
//!    results → calls the LLM again
//! 4. When the LLM returns plain text → appends it and returns it
//!
//! Only one model call or tool call is ever in flight.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::mcp::McpHub;
use crate::provider::types::{ChatMessage, ToolCallMessage, ToolDefinition, Usage};
use crate::provider::LlmProvider;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;

/// Messages reloaded from a stored session when a chat resumes.
const HISTORY_LIMIT: usize = 100;

pub const MAX_ITERATIONS_NOTICE: &str =
    "I've reached the maximum number of tool calls for this request. \
     Please review the results above or rephrase the question.";

/// Where tool calls go: a set of MCP servers or the in-process registry.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Tools to advertise to the model.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run a tool and return its textual result.
    async fn call(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<String>;
}

#[async_trait]
impl ToolBackend for McpHub {
    fn definitions(&self) -> Vec<ToolDefinition> {
        McpHub::definitions(self)
    }

    async fn call(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<String> {
        Ok(McpHub::call(self, name, arguments).await?)
    }
}

#[async_trait]
impl ToolBackend for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        ToolRegistry::definitions(self)
    }

    async fn call(&self, name: &str, arguments: Map<String, Value>) -> anyhow::Result<String> {
        self.execute(name, arguments.into_iter().collect()).await
    }
}

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: u32,
    pub system_prompt: String,
}

struct Persistence {
    sessions: SessionManager,
    key: String,
}

/// The core agent loop. Owns the transcript for one conversation.
pub struct AgentLoop {
    provider: Arc<dyn LlmProvider>,
    backend: Box<dyn ToolBackend>,
    config: AgentConfig,
    transcript: Vec<ChatMessage>,
    persistence: Option<Persistence>,
    usage: Usage,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        backend: Box<dyn ToolBackend>,
        config: AgentConfig,
    ) -> Self {
        Self {
            provider,
            backend,
            config,
            transcript: Vec::new(),
            persistence: None,
            usage: Usage::default(),
        }
    }

    /// Persist the transcript under `key`, resuming any stored history.
    pub fn with_session(mut self, mut sessions: SessionManager, key: &str) -> Self {
        let session = sessions.get_or_create(key);
        self.transcript = session.history(HISTORY_LIMIT);
        if !self.transcript.is_empty() {
            info!(session = key, messages = self.transcript.len(), "Resumed session");
        }
        self.persistence = Some(Persistence {
            sessions,
            key: key.to_string(),
        });
        self
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    /// Token usage summed over every model call so far.
    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn session_key(&self) -> Option<&str> {
        self.persistence.as_ref().map(|p| p.key.as_str())
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.backend.definitions()
    }

    /// Forget the conversation, on disk too.
    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.transcript.clear();
        if let Some(p) = self.persistence.as_mut() {
            p.sessions.get_or_create(&p.key).clear();
            p.sessions.save(&p.key)?;
        }
        info!("Transcript cleared");
        Ok(())
    }

    /// Process one user turn and return the assistant's final text.
    ///
    /// If the model call fails, the transcript is rolled back to where it
    /// was before this turn and the error is returned.
    pub async fn process(&mut self, user_text: &str, document: Option<&str>) -> anyhow::Result<String> {
        let turn_start = self.transcript.len();
        self.transcript
            .push(ChatMessage::user(&user_content(user_text, document)));

        match self.run_turn().await {
            Ok(reply) => {
                self.persist(turn_start);
                Ok(reply)
            }
            Err(e) => {
                self.transcript.truncate(turn_start);
                Err(e)
            }
        }
    }

    async fn run_turn(&mut self) -> anyhow::Result<String> {
        let tool_defs = self.backend.definitions();

        for iteration in 1..=self.config.max_iterations {
            let mut messages = Vec::with_capacity(self.transcript.len() + 1);
            messages.push(ChatMessage::system(&self.config.system_prompt));
            messages.extend(self.transcript.iter().cloned());

            debug!(iteration, msg_count = messages.len(), "Calling LLM");
            let response = self
                .provider
                .chat(
                    &messages,
                    &tool_defs,
                    self.config.model.as_deref(),
                    self.config.max_tokens,
                    self.config.temperature,
                )
                .await?;
            self.add_usage(&response.usage);

            if !response.wants_tools() {
                if response.stopped_for_tools() {
                    warn!("Model signalled tool use without any tool call, treating reply as final");
                }
                let reply = response.text().to_string();
                if reply.is_empty() {
                    warn!("Model returned an empty reply, leaving it out of the transcript");
                } else {
                    self.transcript.push(ChatMessage::assistant(&reply));
                }
                info!(iterations = iteration, tokens = self.usage.total_tokens, "Response complete");
                return Ok(reply);
            }

            let calls: Vec<ToolCallMessage> =
                response.tool_calls.iter().map(ToolCallMessage::from).collect();
            self.transcript.push(ChatMessage::assistant_with_tool_calls(
                response.content.as_deref().filter(|c| !c.trim().is_empty()),
                calls,
            ));

            for tc in &response.tool_calls {
                info!(tool = %tc.name, id = %tc.id, "Calling tool");
                let result = match self.backend.call(&tc.name, tc.arguments.clone()).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(tool = %tc.name, error = %e, "Tool call failed");
                        format!("Error: {e:#}")
                    }
                };
                debug!(tool = %tc.name, result_len = result.len(), "Tool call complete");
                self.transcript
                    .push(ChatMessage::tool_result(&tc.id, &tc.name, &result));
            }
        }

        warn!(iterations = self.config.max_iterations, "Hit max tool iterations, forcing stop");
        self.transcript.push(ChatMessage::assistant(MAX_ITERATIONS_NOTICE));
        Ok(MAX_ITERATIONS_NOTICE.to_string())
    }

    fn add_usage(&mut self, usage: &Usage) {
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }

    /// Append the messages from `from` onward to the session file.
    fn persist(&mut self, from: usize) {
        let Some(p) = self.persistence.as_mut() else {
            return;
        };
        let session = p.sessions.get_or_create(&p.key);
        for msg in &self.transcript[from..] {
            session.add_chat_message(msg);
        }
        if let Err(e) = p.sessions.save(&p.key) {
            warn!(session = %p.key, error = %e, "Failed to save session");
        }
    }
}

/// The user turn as sent to the model, with the attached document inline.
fn user_content(user_text: &str, document: Option<&str>) -> String {
    match document {
        Some(doc) if !doc.trim().is_empty() => {
            format!("{}\n\nDocument content: {}", user_text.trim(), doc)
        }
        _ => user_text.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::ScriptedProvider;
    use crate::provider::types::{LlmResponse, ToolCallRequest};
    use crate::tools::Tool;
    use serde_json::json;
    use std::collections::HashMap;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, args: HashMap<String, Value>) -> anyhow::Result<String> {
            Ok(format!("echo: {}", crate::tools::str_arg(&args, "text")?))
        }
    }

    fn config(max_iterations: u32) -> AgentConfig {
        AgentConfig {
            model: None,
            max_tokens: 256,
            temperature: 0.0,
            max_iterations,
            system_prompt: "You are a test assistant.".into(),
        }
    }

    fn agent(replies: Vec<anyhow::Result<LlmResponse>>) -> (AgentLoop, Arc<ScriptedProvider>) {
        let provider = Arc::new(ScriptedProvider::new(replies));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));
        let agent = AgentLoop::new(provider.clone(), Box::new(tools), config(5));
        (agent, provider)
    }

    fn call(id: &str, text: &str) -> ToolCallRequest {
        let mut arguments = Map::new();
        arguments.insert("text".into(), json!(text));
        ToolCallRequest {
            id: id.into(),
            name: "echo".into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let (mut agent, provider) = agent(vec![Ok(ScriptedProvider::text("  Hello!  "))]);
        let reply = agent.process("hi", None).await.unwrap();
        assert_eq!(reply, "Hello!");

        let roles: Vec<&str> = agent.transcript().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant"]);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0][0].role, "system");
        assert_eq!(seen[0][1].content_as_str(), Some("hi"));
    }

    #[tokio::test]
    async fn test_empty_reply_is_not_recorded() {
        let (mut agent, provider) = agent(vec![
            Ok(ScriptedProvider::text("   ")),
            Ok(ScriptedProvider::text("Second answer")),
        ]);
        assert_eq!(agent.process("first", None).await.unwrap(), "");
        let roles: Vec<&str> = agent.transcript().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user"]);

        agent.process("again", None).await.unwrap();
        let seen = provider.seen.lock().unwrap();
        assert!(seen[1]
            .iter()
            .all(|m| m.role != "assistant" || m.content_as_str().is_some_and(|c| !c.is_empty())));
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let (mut agent, provider) = agent(vec![
            Ok(ScriptedProvider::tool_call("c1", "echo", json!({"text": "ping"}))),
            Ok(ScriptedProvider::text("Done.")),
        ]);
        let reply = agent.process("use the tool", None).await.unwrap();
        assert_eq!(reply, "Done.");

        let roles: Vec<&str> = agent.transcript().iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "tool", "assistant"]);

        let seen = provider.seen.lock().unwrap();
        let tool_msg = seen[1].last().unwrap();
        assert_eq!(tool_msg.role, "tool");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(tool_msg.content_as_str(), Some("echo: ping"));
    }

    #[tokio::test]
    async fn test_multiple_calls_run_in_order() {
        let response = LlmResponse {
            content: Some("Let me check both.".into()),
            tool_calls: vec![call("a", "first"), call("b", "second")],
            finish_reason: "tool_use".into(),
            usage: Usage::default(),
        };
        let (mut agent, _) = agent(vec![Ok(response), Ok(ScriptedProvider::text("ok"))]);
        agent.process("two things", None).await.unwrap();

        let t = agent.transcript();
        assert_eq!(t[1].tool_calls.as_ref().unwrap().len(), 2);
        assert_eq!(t[2].content_as_str(), Some("echo: first"));
        assert_eq!(t[3].content_as_str(), Some("echo: second"));
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let (mut agent, provider) = agent(vec![
            Ok(ScriptedProvider::tool_call("c1", "missing_tool", json!({}))),
            Ok(ScriptedProvider::text("Sorry.")),
        ]);
        agent.process("x", None).await.unwrap();

        let seen = provider.seen.lock().unwrap();
        let result = seen[1].last().unwrap().content_as_str().unwrap();
        assert!(result.starts_with("Error:"));
        assert!(result.contains("not found"));
    }

    #[tokio::test]
    async fn test_stop_reason_without_calls_is_final() {
        let mut odd = ScriptedProvider::text("Here you go.");
        odd.finish_reason = "tool_use".into();
        let (mut agent, _) = agent(vec![Ok(odd)]);
        assert_eq!(agent.process("x", None).await.unwrap(), "Here you go.");
    }

    #[tokio::test]
    async fn test_max_iterations_notice() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(ScriptedProvider::tool_call("c1", "echo", json!({"text": "1"}))),
            Ok(ScriptedProvider::tool_call("c2", "echo", json!({"text": "2"}))),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(EchoTool));
        let mut agent = AgentLoop::new(provider, Box::new(tools), config(2));

        let reply = agent.process("loop forever", None).await.unwrap();
        assert_eq!(reply, MAX_ITERATIONS_NOTICE);
        assert_eq!(agent.transcript().last().unwrap().role, "assistant");
    }

    #[tokio::test]
    async fn test_document_is_attached() {
        let (mut agent, provider) = agent(vec![Ok(ScriptedProvider::text("ok"))]);
        agent
            .process("summarize this", Some("Revenue: 10"))
            .await
            .unwrap();
        let seen = provider.seen.lock().unwrap();
        assert_eq!(
            seen[0][1].content_as_str(),
            Some("summarize this\n\nDocument content: Revenue: 10")
        );
    }

    #[tokio::test]
    async fn test_failed_turn_rolls_back() {
        let (mut agent, _) = agent(vec![Err(anyhow::anyhow!("503 from provider"))]);
        assert!(agent.process("hello", None).await.is_err());
        assert!(agent.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_session_persist_resume_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let (agent1, _) = agent(vec![Ok(ScriptedProvider::text("first answer"))]);
        let mut agent1 = agent1.with_session(SessionManager::new(dir.path()), "cli:test");
        agent1.process("first question", None).await.unwrap();

        let (agent2, provider) = agent(vec![Ok(ScriptedProvider::text("second answer"))]);
        let mut agent2 = agent2.with_session(SessionManager::new(dir.path()), "cli:test");
        assert_eq!(agent2.transcript().len(), 2);
        agent2.process("second question", None).await.unwrap();
        {
            let seen = provider.seen.lock().unwrap();
            assert_eq!(seen[0][1].content_as_str(), Some("first question"));
        }

        agent2.reset().unwrap();
        assert!(agent2.transcript().is_empty());
        let (agent3, _) = agent(vec![]);
        let agent3 = agent3.with_session(SessionManager::new(dir.path()), "cli:test");
        assert!(agent3.transcript().is_empty());
    }
}
