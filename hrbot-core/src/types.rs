//! Core type definitions for the HR assistant.
//!
//! Defines the conversation data structures shared by the provider layer,
//! the answer engine, and the history store: messages, tool calls, content
//! types, and the classified model reply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LlmError;

/// Represents a participant role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Content within a message: text, tool call, or tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    ToolResult {
        call_id: String,
        output: String,
        is_error: bool,
    },
    MultiPart {
        parts: Vec<Content>,
    },
}

impl Content {
    /// Create a simple text content.
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    /// Create a tool call content.
    pub fn tool_call(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Content::ToolCall {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Create a tool result content.
    pub fn tool_result(
        call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Content::ToolResult {
            call_id: call_id.into(),
            output: output.into(),
            is_error,
        }
    }

    /// Returns the text representation of this content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: Content,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message with auto-generated ID and current timestamp.
    pub fn new(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    /// Create a system message.
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, Content::text(text))
    }

    /// Create a user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, Content::text(text))
    }

    /// Create an assistant message.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, Content::text(text))
    }

    /// Create a tool result message.
    pub fn tool_result(
        call_id: impl Into<String>,
        output: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self::new(Role::Tool, Content::tool_result(call_id, output, is_error))
    }

    /// True for plain user or assistant text turns, the only turns kept
    /// between conversations.
    pub fn is_dialogue_text(&self) -> bool {
        matches!(self.role, Role::User | Role::Assistant) && self.content.as_text().is_some()
    }
}

/// A definition describing a tool for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Output produced by a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
}

impl ToolOutput {
    /// Create a simple text output.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Create an output from a JSON value.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::text(value.to_string())
    }
}

/// A single tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Token usage reported by a provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The result of an LLM completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub message: Message,
    pub usage: TokenUsage,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// A request to the LLM for completion.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
    pub model: Option<String>,
}

impl Default for CompletionRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            tools: None,
            temperature: 0.7,
            max_tokens: None,
            model: None,
        }
    }
}

/// A model reply classified once at the provider boundary.
#[derive(Debug, Clone)]
pub enum LlmReply {
    /// Final text, no tools requested.
    Text(String),
    /// One or more tool calls, with any text emitted alongside them.
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCall>,
    },
    /// The call failed after retries.
    Error(LlmError),
}

impl LlmReply {
    /// Classify a completion result.
    pub fn classify(result: Result<CompletionResponse, LlmError>) -> Self {
        match result {
            Ok(response) => Self::from_content(&response.message.content),
            Err(e) => LlmReply::Error(e),
        }
    }

    fn from_content(content: &Content) -> Self {
        let mut texts = Vec::new();
        let mut calls = Vec::new();
        collect_parts(content, &mut texts, &mut calls);

        let text = if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n"))
        };

        if calls.is_empty() {
            LlmReply::Text(text.unwrap_or_default())
        } else {
            LlmReply::ToolCalls { text, calls }
        }
    }
}

fn collect_parts(content: &Content, texts: &mut Vec<String>, calls: &mut Vec<ToolCall>) {
    match content {
        Content::Text { text } => {
            if !text.is_empty() {
                texts.push(text.clone());
            }
        }
        Content::ToolCall {
            id,
            name,
            arguments,
        } => calls.push(ToolCall {
            id: id.clone(),
            name: name.clone(),
            arguments: arguments.clone(),
        }),
        Content::ToolResult { .. } => {}
        Content::MultiPart { parts } => {
            for part in parts {
                collect_parts(part, texts, calls);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::user("Hola");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.content.as_text(), Some("Hola"));
        assert!(msg.is_dialogue_text());
    }

    #[test]
    fn test_tool_result_is_not_dialogue() {
        let msg = Message::tool_result("call_1", "{}", false);
        assert_eq!(msg.role, Role::Tool);
        assert!(!msg.is_dialogue_text());
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let msg = Message::assistant("respuesta");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"role\":\"assistant\""));
        assert!(json.contains("\"type\":\"text\""));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_classify_text() {
        let response = CompletionResponse {
            message: Message::assistant("Tienes 2 días."),
            usage: TokenUsage::default(),
            model: "mock".into(),
            finish_reason: Some("stop".into()),
        };
        match LlmReply::classify(Ok(response)) {
            LlmReply::Text(t) => assert_eq!(t, "Tienes 2 días."),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_multipart_tool_calls() {
        let content = Content::MultiPart {
            parts: vec![
                Content::text("Voy a registrar"),
                Content::tool_call("c1", "registrar_pregunta", serde_json::json!({})),
                Content::tool_call("c2", "enviar_email_rrhh", serde_json::json!({})),
            ],
        };
        let response = CompletionResponse {
            message: Message::new(Role::Assistant, content),
            usage: TokenUsage::default(),
            model: "mock".into(),
            finish_reason: Some("tool_calls".into()),
        };
        match LlmReply::classify(Ok(response)) {
            LlmReply::ToolCalls { text, calls } => {
                assert_eq!(text.as_deref(), Some("Voy a registrar"));
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[1].name, "enviar_email_rrhh");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_error() {
        let reply = LlmReply::classify(Err(LlmError::Timeout { timeout_secs: 5 }));
        assert!(matches!(reply, LlmReply::Error(LlmError::Timeout { .. })));
    }

    #[test]
    fn test_token_usage_accumulate() {
        let mut total = TokenUsage::default();
        total.accumulate(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.accumulate(&TokenUsage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.total(), 20);
    }
}
