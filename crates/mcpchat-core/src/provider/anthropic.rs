//! Native Anthropic Messages API provider.
//!
//! The Messages API differs from the OpenAI shape in three places:
//! the system prompt is a top-level field, assistant tool calls are
//! `tool_use` content blocks, and tool results travel back as
//! `tool_result` blocks inside a user turn.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::types::{ChatMessage, LlmResponse, ToolCallRequest, ToolDefinition, Usage};
use super::LlmProvider;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, default_model: &str, client: Client) -> Self {
        let base_url = api_base
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        debug!(base_url = %base_url, "Initialized Anthropic provider");
        Self {
            client,
            api_key: api_key.to_string(),
            base_url,
            default_model: default_model.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String, input: Value },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Convert the transcript into Messages API turns.
///
/// Returns the hoisted system prompt (several system messages are joined
/// with blank lines) and the message array. Consecutive tool results are
/// folded into a single user turn.
fn to_anthropic_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
    let mut system: Vec<&str> = Vec::new();
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({ "role": "user", "content": std::mem::take(pending) }));
        }
    };

    for msg in messages {
        let text = msg.content_as_str().unwrap_or("");
        match msg.role.as_str() {
            "system" => system.push(text),
            "tool" => pending_results.push(json!({
                "type": "tool_result",
                "tool_use_id": msg.tool_call_id.as_deref().unwrap_or_default(),
                "content": text,
            })),
            "assistant" => {
                flush(&mut out, &mut pending_results);
                let mut blocks = Vec::new();
                if !text.trim().is_empty() {
                    blocks.push(json!({ "type": "text", "text": text }));
                }
                for tc in msg.tool_calls.iter().flatten() {
                    let input: Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| json!({}));
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": tc.id,
                        "name": tc.function.name,
                        "input": input,
                    }));
                }
                // The API rejects empty text blocks, so a turn with
                // nothing to say is left out.
                if !blocks.is_empty() {
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            _ => {
                flush(&mut out, &mut pending_results);
                if !text.trim().is_empty() {
                    out.push(json!({ "role": "user", "content": text }));
                }
            }
        }
    }
    flush(&mut out, &mut pending_results);

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, out)
}

fn to_anthropic_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.function.name,
                "description": t.function.description,
                "input_schema": t.function.parameters,
            })
        })
        .collect()
}

fn parse_response(body: &str) -> Result<LlmResponse> {
    let raw: MessagesResponse =
        serde_json::from_str(body).context("Failed to parse Anthropic response")?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for block in raw.content {
        match block {
            ContentBlock::Text { text: t } => {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&t);
            }
            ContentBlock::ToolUse { id, name, input } => {
                let arguments = match input {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                tool_calls.push(ToolCallRequest { id, name, arguments });
            }
            ContentBlock::Other => {}
        }
    }

    let usage = raw.usage.map_or(Usage::default(), |u| Usage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.input_tokens + u.output_tokens,
    });

    Ok(LlmResponse {
        content: (!text.is_empty()).then_some(text),
        tool_calls,
        finish_reason: raw.stop_reason.unwrap_or_else(|| "end_turn".into()),
        usage,
    })
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        model: Option<&str>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<LlmResponse> {
        let (system, turns) = to_anthropic_messages(messages);
        let body = MessagesRequest {
            model: model.unwrap_or(&self.default_model),
            max_tokens,
            temperature,
            system,
            messages: turns,
            tools: to_anthropic_tools(tools),
        };
        let url = format!("{}/messages", self.base_url);

        debug!(model = body.model, msg_count = body.messages.len(), "Sending Anthropic messages request");
        trace!(request = %serde_json::to_string(&body).unwrap_or_default());

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = response.status();
        let text = response
            .text()
            .await
            .context("Failed to read Anthropic response body")?;
        trace!(response = %text);

        if !status.is_success() {
            let msg = serde_json::from_str::<ApiError>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            anyhow::bail!("LLM API error ({}): {}", status, msg);
        }

        parse_response(&text)
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::types::{FunctionCall, ToolCallMessage};

    #[test]
    fn test_system_prompt_is_hoisted() {
        let msgs = vec![
            ChatMessage::system("Be brief."),
            ChatMessage::user("hello"),
        ];
        let (system, turns) = to_anthropic_messages(&msgs);
        assert_eq!(system.as_deref(), Some("Be brief."));
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["role"], "user");
    }

    #[test]
    fn test_tool_round_trip_shapes() {
        let call = ToolCallMessage {
            id: "toolu_1".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "fetch_price".into(),
                arguments: r#"{"coin":"bitcoin"}"#.into(),
            },
        };
        let msgs = vec![
            ChatMessage::user("price?"),
            ChatMessage::assistant_with_tool_calls(None, vec![call]),
            ChatMessage::tool_result("toolu_1", "fetch_price", "42 USD"),
        ];
        let (_, turns) = to_anthropic_messages(&msgs);

        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1]["content"][0]["type"], "tool_use");
        assert_eq!(turns[1]["content"][0]["input"]["coin"], "bitcoin");
        assert_eq!(turns[2]["role"], "user");
        assert_eq!(turns[2]["content"][0]["type"], "tool_result");
        assert_eq!(turns[2]["content"][0]["tool_use_id"], "toolu_1");
    }

    #[test]
    fn test_consecutive_tool_results_share_a_turn() {
        let msgs = vec![
            ChatMessage::tool_result("a", "x", "1"),
            ChatMessage::tool_result("b", "y", "2"),
        ];
        let (_, turns) = to_anthropic_messages(&msgs);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0]["content"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_empty_turns_produce_no_empty_text_blocks() {
        let msgs = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant(""),
            ChatMessage::user("   "),
            ChatMessage::assistant("  \n"),
            ChatMessage::user("second"),
        ];
        let (_, turns) = to_anthropic_messages(&msgs);

        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["content"], "first");
        assert_eq!(turns[1]["content"], "second");
        for turn in &turns {
            for block in turn["content"].as_array().into_iter().flatten() {
                assert_ne!(block["text"], "");
            }
        }
    }

    #[test]
    fn test_whitespace_text_beside_tool_use_is_dropped() {
        let call = ToolCallMessage {
            id: "toolu_2".into(),
            call_type: "function".into(),
            function: FunctionCall {
                name: "list_tables".into(),
                arguments: "{}".into(),
            },
        };
        let msgs = vec![ChatMessage::assistant_with_tool_calls(Some(" "), vec![call])];
        let (_, turns) = to_anthropic_messages(&msgs);
        let blocks = turns[0]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0]["type"], "tool_use");
    }

    #[test]
    fn test_parse_tool_use_response() {
        let body = r#"{
            "id": "msg_1",
            "model": "claude",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_9", "name": "test_regex",
                 "input": {"regex_pattern": "a+", "text_to_search": "caab", "answer_text": "aa"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 3, "output_tokens": 4}
        }"#;
        let resp = parse_response(body).unwrap();
        assert!(resp.stopped_for_tools());
        assert!(resp.wants_tools());
        assert_eq!(resp.text(), "Let me check.");
        assert_eq!(resp.tool_calls[0].name, "test_regex");
        assert_eq!(resp.usage.total_tokens, 7);
    }

    #[test]
    fn test_tools_use_input_schema() {
        let defs = vec![ToolDefinition::function(
            "current_datetime",
            "Report the date and time",
            json!({"type": "object", "properties": {}}),
        )];
        let tools = to_anthropic_tools(&defs);
        assert_eq!(tools[0]["name"], "current_datetime");
        assert_eq!(tools[0]["input_schema"]["type"], "object");
    }
}
