//! LLM provider trait and failover wrapper.
//!
//! Defines the `LlmProvider` trait that all backends must implement.
//! The `openai` module covers every OpenAI-compatible endpoint; the
//! `anthropic` module speaks the native Messages API.

pub mod anthropic;
pub mod openai;
pub mod types;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use types::{ChatMessage, LlmResponse, ToolDefinition};

/// Trait for LLM providers.
///
/// Any backend that can handle chat completions with tool calling
/// must implement this trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a chat completion request.
    ///
    /// # Arguments
    /// * `messages` - Conversation transcript, oldest first
    /// * `tools` - Available tool definitions (empty = no tool calling)
    /// * `model` - Model identifier override (None = use default)
    /// * `max_tokens` - Maximum response tokens
    /// * `temperature` - Sampling temperature
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<LlmResponse>;

    /// Get the default model identifier.
    fn default_model(&self) -> &str;
}

/// A provider that wraps multiple other providers and implements failover logic.
///
/// If a provider returns a quota error (like a 429), the `FallbackProvider`
/// will automatically try the next provider in its list.
pub struct FallbackProvider {
    providers: Vec<(String, Box<dyn LlmProvider>)>,
    /// Maps provider name to the time of the last quota error.
    health: Mutex<HashMap<String, Instant>>,
}

/// Duration to quarantine a provider after a quota error.
const QUARANTINE_DURATION: Duration = Duration::from_secs(60);

impl FallbackProvider {
    pub fn new(providers: Vec<(String, Box<dyn LlmProvider>)>) -> Self {
        Self {
            providers,
            health: Mutex::new(HashMap::new()),
        }
    }

    fn is_quarantined(&self, name: &str, now: Instant) -> bool {
        let health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health
            .get(name)
            .is_some_and(|&last_err| now.duration_since(last_err) < QUARANTINE_DURATION)
    }

    fn quarantine(&self, name: &str) {
        let mut health = self.health.lock().unwrap_or_else(PoisonError::into_inner);
        health.insert(name.to_string(), Instant::now());
    }
}

fn is_quota_error(err: &anyhow::Error) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("429") || msg.contains("quota") || msg.contains("rate limit")
}

#[async_trait]
impl LlmProvider for FallbackProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> anyhow::Result<LlmResponse> {
        let mut last_error = None;
        let now = Instant::now();

        for (i, (name, provider)) in self.providers.iter().enumerate() {
            if self.is_quarantined(name, now) {
                debug!(provider = %name, "Provider is in quarantine, skipping");
                continue;
            }

            // A model override only makes sense for the primary provider.
            let effective_model = if i == 0 { model } else { None };

            match provider
                .chat(messages, tools, effective_model, max_tokens, temperature)
                .await
            {
                Ok(res) => return Ok(res),
                Err(e) if is_quota_error(&e) => {
                    warn!(
                        provider = %name,
                        error = %e,
                        "Provider failed with quota error, entering quarantine"
                    );
                    self.quarantine(name);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("All providers are exhausted or in quarantine")))
    }

    fn default_model(&self) -> &str {
        self.providers
            .first()
            .map(|(_, p)| p.default_model())
            .unwrap_or("")
    }
}
