//! Step-level events streamed to the caller.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::agent::mutation::SuspensionToken;

/// One event in the response stream for a submission.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Assistant output text.
    Token { content: String },
    /// The model requested a tool invocation.
    ToolCall {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// The workflow paused for a human decision.
    Suspend {
        thread_id: Uuid,
        token: SuspensionToken,
    },
    /// A step failed; the thread keeps the error as `last_error`.
    Error { message: String },
    /// The run reached a terminal state.
    Done { thread_id: Uuid },
}

impl AgentEvent {
    /// The event kind tag, as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Token { .. } => "token",
            AgentEvent::ToolCall { .. } => "tool_call",
            AgentEvent::Suspend { .. } => "suspend",
            AgentEvent::Error { .. } => "error",
            AgentEvent::Done { .. } => "done",
        }
    }
}

/// Sending half of the event stream.
///
/// A disconnected receiver is not an error: execution (and in particular
/// checkpoint writes) must finish regardless of whether anyone is still
/// listening.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<AgentEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<AgentEvent>) -> Self {
        Self { tx }
    }

    /// A sink without a listener, for background or test runs.
    pub fn discard() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    pub async fn send(&self, event: AgentEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event receiver gone, continuing without emission");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_after_receiver_drop_is_silent() {
        let (tx, rx) = mpsc::channel(4);
        let sink = EventSink::new(tx);
        drop(rx);
        // Must not panic or error.
        sink.send(AgentEvent::Token {
            content: "hi".into(),
        })
        .await;
    }

    #[test]
    fn kind_tags_match_the_wire_protocol() {
        let event = AgentEvent::Done {
            thread_id: Uuid::nil(),
        };
        assert_eq!(event.kind(), "done");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "done");
    }
}
