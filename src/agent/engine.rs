//! Conversational engine seam and chat history types

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::Result;

/// Stream of engine output for one invocation
pub type EventStream = BoxStream<'static, Result<EngineEvent>>;

/// Author of a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    /// Wire name used by chat completion APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// A tool invocation requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One conversation history entry
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System prompt entry
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// User turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Assistant reply
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Assistant turn that requested tool calls, with any text spoken before them
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.filter(|c| !c.is_empty()),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Result of a tool call
    #[must_use]
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Text content, empty when absent
    #[must_use]
    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A tool the engine may call
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,

    /// JSON Schema of the arguments object
    pub parameters: serde_json::Value,
}

/// One item of engine output
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A complete sentence ready to be spoken
    Text(String),

    /// A fully assembled tool call
    ToolCall(ToolCall),
}

/// The large conversational model
#[async_trait]
pub trait ConversationEngine: Send + Sync {
    /// Start a response to the given history
    ///
    /// Dropping the returned stream abandons the response.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn respond(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<EventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assistant_tool_calls_drops_empty_text() {
        let msg = ChatMessage::assistant_tool_calls(Some(String::new()), Vec::new());
        assert!(msg.content.is_none());
        assert_eq!(msg.content_str(), "");
        assert_eq!(msg.role.as_str(), "assistant");
    }

    #[test]
    fn test_tool_message_carries_call_id() {
        let msg = ChatMessage::tool("call_1", "ok");
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(msg.role, Role::Tool);
    }
}
