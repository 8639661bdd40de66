//! Provider-agnostic conversation and tool-calling types.
//!
//! A [`Message`] is one turn in a thread. The same shape is persisted in
//! checkpoints and sent to the LLM, so the invariants the orchestrator
//! enforces (every tool call followed by exactly one correlated result) hold
//! end to end.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LlmError;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ephemeral instruction turn; never persisted in a thread.
    System,
    Human,
    Assistant,
    ToolResult,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Correlation id; the matching result message echoes it.
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One turn in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    /// Present on assistant messages that request a tool invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call: Option<ToolCall>,
    /// Present on tool-result messages; correlates to the invocation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            tool_call: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self::new(Role::Human, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn assistant_with_tool_call(content: impl Into<String>, tool_call: ToolCall) -> Self {
        Self {
            tool_call: Some(tool_call),
            ..Self::new(Role::Assistant, content)
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::ToolResult, content)
        }
    }

    /// Whether this is an assistant message carrying a tool invocation.
    pub fn is_tool_invocation(&self) -> bool {
        self.role == Role::Assistant && self.tool_call.is_some()
    }
}

/// Schema of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request for a plain completion (no tools).
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Response to a plain completion.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
}

/// What the model produced when tools were offered: a direct answer, a tool
/// invocation, or both (some providers attach preamble text to a call).
#[derive(Debug, Clone)]
pub struct AssistantTurn {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

/// The LLM capability as the orchestrator sees it: synchronous
/// request/response, tool binding handled by the provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    async fn complete_with_tools(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<AssistantTurn, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_invocation_detection() {
        let plain = Message::assistant("hello");
        assert!(!plain.is_tool_invocation());

        let call = Message::assistant_with_tool_call(
            "",
            ToolCall {
                id: "call_1".into(),
                name: "delete_ticket".into(),
                arguments: serde_json::json!({"ticket_id": "PZ-1"}),
            },
        );
        assert!(call.is_tool_invocation());

        let result = Message::tool_result("call_1", "done");
        assert!(!result.is_tool_invocation());
        assert_eq!(result.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn message_roundtrips_through_serde() {
        let msg = Message::assistant_with_tool_call(
            "deleting",
            ToolCall {
                id: "call_9".into(),
                name: "delete_ticket".into(),
                arguments: serde_json::json!({"ticket_id": "PZ-9"}),
            },
        );
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.tool_call, msg.tool_call);
    }
}
