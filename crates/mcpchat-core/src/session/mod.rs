//! Session management for chat transcripts.
//!
//! Sessions are stored as JSONL files under `<workspace>/sessions`.
//! The first line holds metadata; every following line is one message,
//! in chat order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::provider::types::{ChatMessage, ToolCallMessage};

/// A conversation session with message history.
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub messages: Vec<SessionMessage>,
    pub created_at: String,
    pub updated_at: String,
}

/// A single message in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    pub content: Option<String>,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl From<&SessionMessage> for ChatMessage {
    fn from(m: &SessionMessage) -> Self {
        ChatMessage {
            role: m.role.clone(),
            content: m.content.clone().map(serde_json::Value::String),
            tool_calls: m.tool_calls.clone(),
            tool_call_id: m.tool_call_id.clone(),
            name: m.name.clone(),
        }
    }
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

impl Session {
    pub fn new(key: &str) -> Self {
        let now = now();
        Self {
            key: key.to_string(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Add a plain role/content message.
    pub fn add_message(&mut self, role: &str, content: &str) {
        self.messages.push(SessionMessage {
            role: role.to_string(),
            content: Some(content.to_string()),
            timestamp: now(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
        self.updated_at = now();
    }

    /// Add a full chat message, tool calls included.
    pub fn add_chat_message(&mut self, msg: &ChatMessage) {
        self.messages.push(SessionMessage {
            role: msg.role.clone(),
            content: msg.content_as_str().map(|s| s.to_string()),
            timestamp: now(),
            tool_calls: msg.tool_calls.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        });
        self.updated_at = now();
    }

    /// The most recent `max_messages` messages as chat messages.
    ///
    /// A window never starts on a tool result: the assistant turn that
    /// requested it would be missing, which providers reject.
    pub fn history(&self, max_messages: usize) -> Vec<ChatMessage> {
        let mut start = self.messages.len().saturating_sub(max_messages);
        while start < self.messages.len() && self.messages[start].role == "tool" {
            start += 1;
        }
        self.messages[start..].iter().map(ChatMessage::from).collect()
    }

    /// Clear all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.updated_at = now();
    }
}

/// Manages conversation sessions with file-based persistence.
pub struct SessionManager {
    sessions_dir: PathBuf,
    cache: HashMap<String, Session>,
}

impl SessionManager {
    pub fn new(workspace: &Path) -> Self {
        let sessions_dir = workspace.join("sessions");
        if let Err(e) = std::fs::create_dir_all(&sessions_dir) {
            warn!(path = %sessions_dir.display(), error = %e, "Failed to create sessions directory");
        }

        Self {
            sessions_dir,
            cache: HashMap::new(),
        }
    }

    /// Get an existing session or create a new one.
    pub fn get_or_create(&mut self, key: &str) -> &mut Session {
        if !self.cache.contains_key(key) {
            let session = self.load(key).unwrap_or_else(|| Session::new(key));
            self.cache.insert(key.to_string(), session);
        }
        self.cache
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key))
    }

    /// Save a session to disk.
    pub fn save(&self, key: &str) -> anyhow::Result<()> {
        let session = match self.cache.get(key) {
            Some(s) => s,
            None => return Ok(()),
        };

        let path = self.session_path(key);
        let mut lines = Vec::with_capacity(session.messages.len() + 1);

        let metadata = serde_json::json!({
            "_type": "metadata",
            "key": session.key,
            "created_at": session.created_at,
            "updated_at": session.updated_at,
        });
        lines.push(serde_json::to_string(&metadata)?);

        for msg in &session.messages {
            lines.push(serde_json::to_string(msg)?);
        }

        std::fs::write(&path, lines.join("\n") + "\n")?;
        debug!(key, messages = session.messages.len(), "Saved session");
        Ok(())
    }

    /// Delete a session. Returns whether a file was removed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.cache.remove(key);
        let path = self.session_path(key);
        if path.exists() {
            std::fs::remove_file(path).is_ok()
        } else {
            false
        }
    }

    /// All stored sessions as `(key, updated_at)`, most recent first.
    pub fn list_sessions(&self) -> Vec<(String, String)> {
        let mut sessions = Vec::new();

        if let Ok(entries) = std::fs::read_dir(&self.sessions_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "jsonl") {
                    let metadata = std::fs::read_to_string(&path)
                        .ok()
                        .and_then(|c| c.lines().next().map(|l| l.to_string()))
                        .and_then(|l| serde_json::from_str::<serde_json::Value>(&l).ok())
                        .unwrap_or_default();

                    // File names lose `:` and `/`, so the key recorded in the
                    // metadata wins. Older files without one keep their stem.
                    let key = metadata["key"]
                        .as_str()
                        .map(|k| k.to_string())
                        .unwrap_or_else(|| {
                            path.file_stem()
                                .unwrap_or_default()
                                .to_string_lossy()
                                .into_owned()
                        });
                    let updated = metadata["updated_at"].as_str().unwrap_or_default().to_string();

                    sessions.push((key, updated));
                }
            }
        }

        sessions.sort_by(|a, b| b.1.cmp(&a.1));
        sessions
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn session_path(&self, key: &str) -> PathBuf {
        let safe_name = key.replace([':', '/', '\\'], "_");
        self.sessions_dir.join(format!("{}.jsonl", safe_name))
    }

    fn load(&self, key: &str) -> Option<Session> {
        let path = self.session_path(key);
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(&path).ok()?;
        let mut messages = Vec::new();
        let mut created_at = String::new();
        let mut updated_at = String::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<serde_json::Value>(line) {
                Ok(value) if value.get("_type").and_then(|v| v.as_str()) == Some("metadata") => {
                    created_at = value["created_at"].as_str().unwrap_or_default().to_string();
                    updated_at = value["updated_at"].as_str().unwrap_or_default().to_string();
                }
                Ok(value) => match serde_json::from_value::<SessionMessage>(value) {
                    Ok(msg) => messages.push(msg),
                    Err(e) => warn!(error = %e, "Skipping malformed session message"),
                },
                Err(_) => warn!(line, "Failed to parse session line"),
            }
        }

        Some(Session {
            key: key.to_string(),
            messages,
            created_at,
            updated_at,
        })
    }
}
