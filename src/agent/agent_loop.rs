//! The orchestrator: graph assembly and submission handling.
//!
//! One graph serves every thread. A submission is either a new human message
//! or a resume decision for a suspended workflow; both load the latest
//! checkpoint, run the graph to a terminal or a suspension, and stream step
//! events to the caller.

use std::sync::Arc;

use uuid::Uuid;

use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::graph::{END, Graph, GraphRunner, RunOutcome, StepContext};
use crate::agent::mutation::{ApplyMutationStep, ProposeMutationStep, ResumeDecision};
use crate::agent::rag::{GenerateStep, GiveUpStep, GradeStep, RagDecision, RetrieveStep};
use crate::agent::repair::RepairStep;
use crate::agent::respond::{RespondStep, is_final_answer, wants_mutation, wants_search};
use crate::agent::state::AgentState;
use crate::agent::threads::ThreadRegistry;
use crate::checkpoint::{CheckpointStore, ThreadSummary};
use crate::config::AgentConfig;
use crate::error::{AgentError, Error, GraphError, StoreError};
use crate::knowledge::KnowledgeStore;
use crate::llm::{LlmProvider, Message};
use crate::tracker::TrackerClient;

/// One unit of caller input.
#[derive(Debug)]
pub enum Submission {
    /// A new human message.
    Message(String),
    /// A decision for the thread's suspended workflow.
    Resume(ResumeDecision),
}

pub struct Orchestrator {
    graph: Graph,
    checkpoints: Arc<dyn CheckpointStore>,
    llm: Arc<dyn LlmProvider>,
    knowledge: Arc<dyn KnowledgeStore>,
    threads: ThreadRegistry,
    config: AgentConfig,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        knowledge: Arc<dyn KnowledgeStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: AgentConfig,
    ) -> Result<Self, GraphError> {
        Ok(Self {
            graph: build_graph()?,
            checkpoints,
            llm,
            knowledge,
            threads: ThreadRegistry::new(),
            config,
        })
    }

    /// Handle one submission for a thread, streaming events into `events`.
    ///
    /// Returns the thread id (freshly minted for a first message) along with
    /// how the run ended.
    pub async fn submit(
        &self,
        user_id: &str,
        thread_id: Option<Uuid>,
        submission: Submission,
        tracker: Option<Arc<dyn TrackerClient>>,
        events: &EventSink,
    ) -> Result<(Uuid, RunOutcome), Error> {
        let thread_id = thread_id.unwrap_or_else(Uuid::new_v4);
        let _guard = self.threads.lock(thread_id).await;

        let checkpoint = self.checkpoints.load_owned(thread_id, user_id).await?;

        let (mut state, start, base_seq) = match submission {
            Submission::Message(text) => {
                let (mut state, seq) = match checkpoint {
                    Some(c) => (c.state, c.seq),
                    None => (AgentState::default(), 0),
                };
                state.push_message(Message::human(text));
                state.last_error = None;
                (state, self.graph.entry().to_string(), seq)
            }
            Submission::Resume(decision) => {
                let checkpoint =
                    checkpoint.ok_or(AgentError::NothingToResume(thread_id))?;
                let mut state = checkpoint.state;
                if state.pending.is_none() || checkpoint.step == END {
                    return Err(AgentError::NothingToResume(thread_id).into());
                }
                state.resume = Some(decision);
                state.last_error = None;
                (state, checkpoint.step, checkpoint.seq)
            }
        };

        let ctx = StepContext {
            thread_id,
            llm: Arc::clone(&self.llm),
            knowledge: Arc::clone(&self.knowledge),
            tracker,
            config: self.config.clone(),
        };

        let runner = GraphRunner::new(&self.graph, Arc::clone(&self.checkpoints));
        let outcome = runner
            .run(user_id, &start, base_seq, &mut state, &ctx, events)
            .await?;

        if matches!(outcome, RunOutcome::Completed) {
            events.send(AgentEvent::Done { thread_id }).await;
        }
        Ok((thread_id, outcome))
    }

    pub async fn list_threads(&self, user_id: &str) -> Result<Vec<ThreadSummary>, StoreError> {
        self.checkpoints.list(user_id).await
    }

    /// Ownership-checked deletion; a foreign or missing thread is the same
    /// not-found error.
    pub async fn delete_thread(&self, thread_id: Uuid, user_id: &str) -> Result<(), StoreError> {
        let _guard = self.threads.lock(thread_id).await;
        if self.checkpoints.delete(thread_id, user_id).await? {
            Ok(())
        } else {
            Err(StoreError::ThreadNotFound(thread_id))
        }
    }
}

/// Assemble the full agent graph.
///
/// ```text
/// repair -> respond -> { retrieve | propose_mutation | END }
/// retrieve -> grade -> { retrieve | generate | give_up }
/// generate -> END     give_up -> END
/// propose_mutation -(suspend)-> apply_mutation -> respond
/// ```
fn build_graph() -> Result<Graph, GraphError> {
    Graph::builder()
        .step("repair", RepairStep)
        .step("respond", RespondStep)
        .step("retrieve", RetrieveStep)
        .step("grade", GradeStep)
        .step("generate", GenerateStep)
        .step("give_up", GiveUpStep)
        .step("propose_mutation", ProposeMutationStep)
        .step("apply_mutation", ApplyMutationStep)
        .entry("repair")
        .edge("repair", "respond")
        .edge_if("respond", wants_search, "retrieve")
        .edge_if("respond", wants_mutation, "propose_mutation")
        // Guarded on purpose: an unknown tool name must fall through to a
        // configuration error, not silently end the run.
        .edge_if("respond", is_final_answer, END)
        .edge("retrieve", "grade")
        .edge_if(
            "grade",
            |s| s.rag_decision == Some(RagDecision::Retry),
            "retrieve",
        )
        .edge_if(
            "grade",
            |s| s.rag_decision == Some(RagDecision::Generate),
            "generate",
        )
        .edge_if(
            "grade",
            |s| s.rag_decision == Some(RagDecision::GiveUp),
            "give_up",
        )
        .edge("generate", END)
        .edge("give_up", END)
        .edge_if(
            "propose_mutation",
            |s| s.pending.is_some(),
            "apply_mutation",
        )
        .edge("propose_mutation", "respond")
        // A failed retarget re-suspends on the same step.
        .edge_if("apply_mutation", |s| s.pending.is_some(), "apply_mutation")
        .edge("apply_mutation", "respond")
        .build()
}
