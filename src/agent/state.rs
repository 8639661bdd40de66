//! Per-thread agent state, the value checkpointed after every step.

use serde::{Deserialize, Serialize};

use crate::agent::mutation::{ResumeDecision, SuspensionToken};
use crate::agent::rag::RagDecision;
use crate::knowledge::Document;
use crate::llm::{Message, Role};

/// Everything the orchestrator threads through a run. Serialized verbatim
/// into checkpoints; resuming from the latest checkpoint reconstructs this
/// struct exactly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentState {
    pub messages: Vec<Message>,
    /// Retrieved knowledge snippets, deduplicated by id. Order is not
    /// significant.
    #[serde(default)]
    pub documents: Vec<Document>,
    /// Retries after the initial retrieval attempt in the current self-RAG
    /// loop.
    #[serde(default)]
    pub rag_retries: u32,
    /// Branch marker set by the grading step, consumed by the edge guards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rag_decision: Option<RagDecision>,
    /// Free-form workflow marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Last step failure, preserved for inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// The suspension awaiting a human decision, if any. Consumed exactly
    /// once at resume time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<SuspensionToken>,
    /// The decision supplied on resume, consumed by the apply step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeDecision>,
}

impl AgentState {
    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// The question currently being worked on: the content of the most
    /// recent human message.
    pub fn question(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Human)
            .map(|m| m.content.as_str())
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
    }

    /// Name of the tool invocation on the most recent assistant message,
    /// when that invocation has no correlated result yet.
    pub fn open_invocation(&self) -> Option<&crate::llm::ToolCall> {
        let call = self.last_assistant()?.tool_call.as_ref()?;
        let answered = self
            .messages
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some(call.id.as_str()));
        (!answered).then_some(call)
    }

    /// Merge retrieved documents, dropping ids already present.
    pub fn add_documents(&mut self, documents: Vec<Document>) -> usize {
        let mut added = 0;
        for doc in documents {
            if !self.documents.iter().any(|d| d.id == doc.id) {
                self.documents.push(doc);
                added += 1;
            }
        }
        added
    }

    /// Write the single result message for an invocation id, replacing an
    /// existing one so each invocation keeps exactly one result.
    pub fn upsert_tool_result(&mut self, call_id: &str, content: impl Into<String>) {
        let content = content.into();
        if let Some(existing) = self
            .messages
            .iter_mut()
            .find(|m| m.role == Role::ToolResult && m.tool_call_id.as_deref() == Some(call_id))
        {
            existing.content = content;
        } else {
            self.messages.push(Message::tool_result(call_id, content));
        }
    }

    /// Reset the self-RAG bookkeeping for a fresh question.
    pub fn reset_rag(&mut self) {
        self.rag_retries = 0;
        self.rag_decision = None;
        self.documents.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: serde_json::json!({}),
        }
    }

    #[test]
    fn question_is_last_human_message() {
        let mut state = AgentState::default();
        state.push_message(Message::human("first"));
        state.push_message(Message::assistant("hi"));
        state.push_message(Message::human("second"));
        assert_eq!(state.question(), Some("second"));
    }

    #[test]
    fn open_invocation_closes_once_result_exists() {
        let mut state = AgentState::default();
        state.push_message(Message::human("delete PZ-1"));
        state.push_message(Message::assistant_with_tool_call(
            "",
            call("T1", "delete_ticket"),
        ));
        assert!(state.open_invocation().is_some());

        state.upsert_tool_result("T1", "done");
        assert!(state.open_invocation().is_none());
    }

    #[test]
    fn upsert_tool_result_never_duplicates() {
        let mut state = AgentState::default();
        state.push_message(Message::assistant_with_tool_call(
            "",
            call("T1", "search_knowledge_base"),
        ));
        state.upsert_tool_result("T1", "Retrieved 0 documents");
        state.upsert_tool_result("T1", "Retrieved 3 documents");

        let results: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.tool_call_id.as_deref() == Some("T1"))
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "Retrieved 3 documents");
    }

    #[test]
    fn documents_dedup_by_id() {
        let mut state = AgentState::default();
        let doc = |id: &str| Document {
            id: id.into(),
            content: "text".into(),
            source: None,
        };
        assert_eq!(state.add_documents(vec![doc("a"), doc("b")]), 2);
        assert_eq!(state.add_documents(vec![doc("b"), doc("c")]), 1);
        assert_eq!(state.documents.len(), 3);
    }
}
