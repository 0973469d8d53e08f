//! LLM provider types shared across all provider implementations.
//!
//! These types define the contract between the agent loop and any LLM backend.
//! Every provider must produce an `LlmResponse` from a list of `ChatMessage`s.

use serde::{Deserialize, Serialize};

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallMessage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: &str, content: &str) -> Self {
        Self {
            role: role.into(),
            content: Some(serde_json::Value::String(content.into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::plain("system", content)
    }

    pub fn user(content: &str) -> Self {
        Self::plain("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::plain("assistant", content)
    }

    pub fn assistant_with_tool_calls(
        content: Option<&str>,
        tool_calls: Vec<ToolCallMessage>,
    ) -> Self {
        Self {
            role: "assistant".into(),
            content: content.map(|c| serde_json::Value::String(c.into())),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: &str, name: &str, result: &str) -> Self {
        Self {
            role: "tool".into(),
            content: Some(serde_json::Value::String(result.into())),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }

    /// Get the content as a string, if it is one.
    pub fn content_as_str(&self) -> Option<&str> {
        self.content.as_ref().and_then(|v| v.as_str())
    }
}

/// A tool call embedded in an assistant message (OpenAI format).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl From<&ToolCallRequest> for ToolCallMessage {
    fn from(tc: &ToolCallRequest) -> Self {
        Self {
            id: tc.id.clone(),
            call_type: "function".into(),
            function: FunctionCall {
                name: tc.name.clone(),
                arguments: serde_json::Value::Object(tc.arguments.clone()).to_string(),
            },
        }
    }
}

/// The function name + arguments within a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A parsed tool call request (arguments already deserialized).
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Response from an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    pub usage: Usage,
}

impl LlmResponse {
    /// Whether the model stopped to request tool execution.
    ///
    /// A `tool_calls`/`tool_use` stop reason without any parsed call is
    /// treated as a final answer: there is nothing to dispatch.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Whether the stop reason itself names tool use.
    pub fn stopped_for_tools(&self) -> bool {
        matches!(self.finish_reason.as_str(), "tool_calls" | "tool_use")
    }

    /// The text part of the reply, trimmed. Empty if the model sent none.
    pub fn text(&self) -> &str {
        self.content.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Token usage statistics.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Tool definition in OpenAI function-calling format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub def_type: String,
    pub function: ToolFunctionDef,
}

impl ToolDefinition {
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            def_type: "function".into(),
            function: ToolFunctionDef {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Function metadata within a tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_constructors() {
        let sys = ChatMessage::system("You are helpful.");
        assert_eq!(sys.role, "system");
        assert_eq!(sys.content_as_str().unwrap(), "You are helpful.");

        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, "user");

        let asst = ChatMessage::assistant("Hi there!");
        assert_eq!(asst.role, "assistant");
    }

    #[test]
    fn test_tool_result_message() {
        let msg = ChatMessage::tool_result("call_123", "summarize_document", "a summary");
        assert_eq!(msg.role, "tool");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_123"));
        assert_eq!(msg.name.as_deref(), Some("summarize_document"));
    }

    #[test]
    fn test_tool_call_message_from_request() {
        let mut args = serde_json::Map::new();
        args.insert("coin".into(), serde_json::json!("bitcoin"));
        let req = ToolCallRequest {
            id: "toolu_1".into(),
            name: "fetch_price".into(),
            arguments: args,
        };

        let msg = ToolCallMessage::from(&req);
        assert_eq!(msg.call_type, "function");
        assert_eq!(msg.function.name, "fetch_price");
        assert_eq!(msg.function.arguments, r#"{"coin":"bitcoin"}"#);
    }

    #[test]
    fn test_wants_tools_requires_calls() {
        let resp = LlmResponse {
            content: Some("  thinking  ".into()),
            tool_calls: Vec::new(),
            finish_reason: "tool_use".into(),
            usage: Usage::default(),
        };
        assert!(resp.stopped_for_tools());
        assert!(!resp.wants_tools());
        assert_eq!(resp.text(), "thinking");
    }
}
