//! Directed-graph step runtime.
//!
//! A graph is a set of named steps plus edges, either unconditional or
//! guarded by a pure predicate over [`AgentState`]. Edges are evaluated in
//! declaration order and the first match wins; no match is a configuration
//! error, not a runtime condition. The runner checkpoints after every step
//! and halts on the terminal marker or a suspension. Cycles are legal and
//! expected; any retry bound belongs to the steps themselves.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::mutation::SuspensionToken;
use crate::agent::state::AgentState;
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::AgentConfig;
use crate::error::{AgentError, Error, GraphError};
use crate::knowledge::KnowledgeStore;
use crate::llm::LlmProvider;
use crate::tracker::TrackerClient;
use uuid::Uuid;

/// Name of the terminal pseudo-step. Not a registered step; an edge pointing
/// here ends the run.
pub const END: &str = "__end__";

/// What a step produced. Suspension is a value here precisely so that no
/// error handler between the step and the caller can swallow it.
#[derive(Debug)]
pub enum StepOutcome {
    /// Follow the edges to the next step.
    Next,
    /// Halt; hand the token to the caller and resume later at the edge
    /// target recorded in the checkpoint.
    Suspend(SuspensionToken),
}

/// Dependencies handed to each step invocation. The tracker client is
/// per-submission (it is bound to the caller's credential); everything else
/// is process-lifetime.
pub struct StepContext {
    pub thread_id: Uuid,
    pub llm: Arc<dyn LlmProvider>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub tracker: Option<Arc<dyn TrackerClient>>,
    pub config: AgentConfig,
}

/// One named step in the graph.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        events: &EventSink,
    ) -> Result<StepOutcome, Error>;
}

type Guard = Box<dyn Fn(&AgentState) -> bool + Send + Sync>;

struct Edge {
    from: String,
    guard: Option<Guard>,
    to: String,
}

/// An immutable, validated step graph.
pub struct Graph {
    steps: HashMap<String, Box<dyn Step>>,
    edges: Vec<Edge>,
    entry: String,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("edges", &self.edges.len())
            .field("entry", &self.entry)
            .finish()
    }
}

impl Graph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::default()
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn has_step(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Select the successor of `from` for the given state: first matching
    /// edge in declaration order.
    fn next_step(&self, from: &str, state: &AgentState) -> Result<&str, GraphError> {
        self.edges
            .iter()
            .filter(|e| e.from == from)
            .find(|e| e.guard.as_ref().is_none_or(|g| g(state)))
            .map(|e| e.to.as_str())
            .ok_or_else(|| GraphError::NoMatchingEdge {
                step: from.to_string(),
            })
    }
}

/// Builder validating the wiring at construction time.
#[derive(Default)]
pub struct GraphBuilder {
    steps: HashMap<String, Box<dyn Step>>,
    edges: Vec<Edge>,
    entry: Option<String>,
}

impl GraphBuilder {
    pub fn step(mut self, name: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.insert(name.into(), Box::new(step));
        self
    }

    pub fn entry(mut self, name: impl Into<String>) -> Self {
        self.entry = Some(name.into());
        self
    }

    /// Unconditional edge.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            guard: None,
            to: to.into(),
        });
        self
    }

    /// Guarded edge; declaration order is evaluation order.
    pub fn edge_if(
        mut self,
        from: impl Into<String>,
        guard: impl Fn(&AgentState) -> bool + Send + Sync + 'static,
        to: impl Into<String>,
    ) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            guard: Some(Box::new(guard)),
            to: to.into(),
        });
        self
    }

    pub fn build(self) -> Result<Graph, GraphError> {
        let entry = self.entry.ok_or_else(|| GraphError::MissingEntry("".into()))?;
        if !self.steps.contains_key(&entry) {
            return Err(GraphError::MissingEntry(entry));
        }
        for edge in &self.edges {
            if !self.steps.contains_key(&edge.from) {
                return Err(GraphError::UnknownStep(edge.from.clone()));
            }
            if edge.to != END && !self.steps.contains_key(&edge.to) {
                return Err(GraphError::UnknownStep(edge.to.clone()));
            }
        }
        Ok(Graph {
            steps: self.steps,
            edges: self.edges,
            entry,
        })
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Terminal step reached.
    Completed,
    /// Halted on a suspension; the checkpoint records where to resume.
    Suspended(SuspensionToken),
}

/// Executes a graph for one thread, checkpointing after every step.
pub struct GraphRunner<'a> {
    graph: &'a Graph,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl<'a> GraphRunner<'a> {
    pub fn new(graph: &'a Graph, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self { graph, checkpoints }
    }

    /// Run from `start` until END or a suspension. `base_seq` is the sequence
    /// number of the checkpoint the state was loaded from (0 for a fresh
    /// thread).
    pub async fn run(
        &self,
        user_id: &str,
        start: &str,
        base_seq: i64,
        state: &mut AgentState,
        ctx: &StepContext,
        events: &EventSink,
    ) -> Result<RunOutcome, Error> {
        let mut current = start.to_string();
        let mut seq = base_seq;

        loop {
            let step = self
                .graph
                .steps
                .get(&current)
                .ok_or_else(|| GraphError::UnknownStep(current.clone()))?;

            tracing::debug!(thread_id = %ctx.thread_id, step = %current, "executing step");

            let outcome = match step.run(state, ctx, events).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // Preserve the failure on the thread, then surface the
                    // step failure to the orchestrator.
                    state.last_error = Some(err.to_string());
                    seq += 1;
                    self.persist(ctx.thread_id, user_id, &current, seq, state)
                        .await?;
                    events
                        .send(AgentEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                    return Err(AgentError::StepFailed {
                        step: current,
                        source: Box::new(err),
                    }
                    .into());
                }
            };

            match outcome {
                StepOutcome::Next => {
                    let next = self.graph.next_step(&current, state)?.to_string();
                    seq += 1;
                    self.persist(ctx.thread_id, user_id, &next, seq, state)
                        .await?;
                    if next == END {
                        return Ok(RunOutcome::Completed);
                    }
                    current = next;
                }
                StepOutcome::Suspend(token) => {
                    let next = self.graph.next_step(&current, state)?.to_string();
                    seq += 1;
                    self.persist(ctx.thread_id, user_id, &next, seq, state)
                        .await?;
                    events
                        .send(AgentEvent::Suspend {
                            thread_id: ctx.thread_id,
                            token: token.clone(),
                        })
                        .await;
                    return Ok(RunOutcome::Suspended(token));
                }
            }
        }
    }

    /// Checkpoint write, shielded from caller cancellation: the save runs on
    /// a spawned task, so dropping the run future cannot abort a write
    /// already in flight.
    async fn persist(
        &self,
        thread_id: Uuid,
        user_id: &str,
        step: &str,
        seq: i64,
        state: &AgentState,
    ) -> Result<(), Error> {
        let checkpoint = Checkpoint {
            thread_id,
            user_id: user_id.to_string(),
            seq,
            step: step.to_string(),
            state: state.clone(),
            created_at: Utc::now(),
        };

        let store = Arc::clone(&self.checkpoints);
        let result = tokio::spawn(async move { store.save(checkpoint).await })
            .await
            .map_err(|e| crate::error::StoreError::WriteAborted(e.to_string()))?;
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::mutation::{MutationAction, MutationProposal};
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::knowledge::Document;
    use crate::llm::{
        AssistantTurn, CompletionRequest, CompletionResponse, Message, ToolDefinition,
    };
    use crate::error::LlmError;

    struct NullLlm;

    #[async_trait]
    impl LlmProvider for NullLlm {
        async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                content: String::new(),
            })
        }

        async fn complete_with_tools(
            &self,
            _messages: Vec<Message>,
            _tools: Vec<ToolDefinition>,
        ) -> Result<AssistantTurn, LlmError> {
            Ok(AssistantTurn {
                content: String::new(),
                tool_calls: vec![],
            })
        }
    }

    struct NullKnowledge;

    #[async_trait]
    impl KnowledgeStore for NullKnowledge {
        async fn retrieve(&self, _question: &str) -> Result<Vec<Document>, LlmError> {
            Ok(vec![])
        }

        async fn add(&self, _documents: Vec<Document>) -> Result<(), LlmError> {
            Ok(())
        }

        async fn delete_collection(&self, _collection_key: &str) -> Result<(), LlmError> {
            Ok(())
        }
    }

    fn ctx() -> StepContext {
        StepContext {
            thread_id: Uuid::new_v4(),
            llm: Arc::new(NullLlm),
            knowledge: Arc::new(NullKnowledge),
            tracker: None,
            config: AgentConfig::default(),
        }
    }

    /// Appends its marker to `status` so tests can observe execution order.
    struct MarkStep(&'static str);

    #[async_trait]
    impl Step for MarkStep {
        async fn run(
            &self,
            state: &mut AgentState,
            _ctx: &StepContext,
            _events: &EventSink,
        ) -> Result<StepOutcome, Error> {
            let mut status = state.status.take().unwrap_or_default();
            status.push_str(self.0);
            state.status = Some(status);
            Ok(StepOutcome::Next)
        }
    }

    struct SuspendStep;

    #[async_trait]
    impl Step for SuspendStep {
        async fn run(
            &self,
            state: &mut AgentState,
            _ctx: &StepContext,
            _events: &EventSink,
        ) -> Result<StepOutcome, Error> {
            let token = SuspensionToken::new(
                "T1".into(),
                MutationProposal {
                    action: MutationAction::Delete,
                    ticket_id: Some("PZ-1".into()),
                    fields: serde_json::json!({}),
                    summary: "delete PZ-1".into(),
                },
            );
            state.pending = Some(token.clone());
            Ok(StepOutcome::Suspend(token))
        }
    }

    #[tokio::test]
    async fn runs_to_end_and_checkpoints_each_step() {
        let graph = Graph::builder()
            .step("a", MarkStep("a"))
            .step("b", MarkStep("b"))
            .entry("a")
            .edge("a", "b")
            .edge("b", END)
            .build()
            .unwrap();

        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = GraphRunner::new(&graph, store.clone());
        let ctx = ctx();
        let mut state = AgentState::default();

        let outcome = runner
            .run("user-1", "a", 0, &mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Completed));
        assert_eq!(state.status.as_deref(), Some("ab"));

        let latest = store.load(ctx.thread_id).await.unwrap().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(latest.step, END);
    }

    #[tokio::test]
    async fn guarded_edges_pick_first_match_in_order() {
        let graph = Graph::builder()
            .step("a", MarkStep("a"))
            .step("yes", MarkStep("y"))
            .step("no", MarkStep("n"))
            .entry("a")
            .edge_if("a", |s| s.rag_retries > 0, "yes")
            .edge("a", "no")
            .edge("yes", END)
            .edge("no", END)
            .build()
            .unwrap();

        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = GraphRunner::new(&graph, store);
        let ctx = ctx();

        let mut state = AgentState::default();
        runner
            .run("user-1", "a", 0, &mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(state.status.as_deref(), Some("an"));

        let mut state = AgentState {
            rag_retries: 1,
            ..Default::default()
        };
        runner
            .run("user-1", "a", 0, &mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();
        assert_eq!(state.status.as_deref(), Some("ay"));
    }

    #[tokio::test]
    async fn missing_edge_is_a_configuration_error() {
        let graph = Graph::builder()
            .step("a", MarkStep("a"))
            .entry("a")
            .build()
            .unwrap();

        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = GraphRunner::new(&graph, store);
        let ctx = ctx();
        let mut state = AgentState::default();

        let err = runner
            .run("user-1", "a", 0, &mut state, &ctx, &EventSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Graph(GraphError::NoMatchingEdge { .. })
        ));
    }

    #[tokio::test]
    async fn suspension_checkpoints_the_resume_target() {
        let graph = Graph::builder()
            .step("propose", SuspendStep)
            .step("apply", MarkStep("apply"))
            .entry("propose")
            .edge("propose", "apply")
            .edge("apply", END)
            .build()
            .unwrap();

        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = GraphRunner::new(&graph, store.clone());
        let ctx = ctx();
        let mut state = AgentState::default();

        let outcome = runner
            .run(
                "user-1",
                "propose",
                0,
                &mut state,
                &ctx,
                &EventSink::discard(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, RunOutcome::Suspended(_)));
        let latest = store.load(ctx.thread_id).await.unwrap().unwrap();
        assert_eq!(latest.step, "apply");
        assert!(latest.state.pending.is_some());
    }

    #[tokio::test]
    async fn builder_rejects_edges_to_unknown_steps() {
        let err = Graph::builder()
            .step("a", MarkStep("a"))
            .entry("a")
            .edge("a", "ghost")
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownStep(name) if name == "ghost"));
    }

    /// A step that fails once lands its error in `last_error` and in the
    /// checkpoint written before the failure is surfaced.
    struct FailingStep;

    #[async_trait]
    impl Step for FailingStep {
        async fn run(
            &self,
            _state: &mut AgentState,
            _ctx: &StepContext,
            _events: &EventSink,
        ) -> Result<StepOutcome, Error> {
            Err(LlmError::Request("boom".into()).into())
        }
    }

    #[tokio::test]
    async fn step_failure_preserves_last_error_in_checkpoint() {
        let graph = Graph::builder()
            .step("a", FailingStep)
            .entry("a")
            .edge("a", END)
            .build()
            .unwrap();

        let store = Arc::new(MemoryCheckpointStore::new());
        let runner = GraphRunner::new(&graph, store.clone());
        let ctx = ctx();
        let mut state = AgentState::default();

        let err = runner
            .run("user-1", "a", 0, &mut state, &ctx, &EventSink::discard())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::StepFailed { .. })));

        let latest = store.load(ctx.thread_id).await.unwrap().unwrap();
        assert!(latest.state.last_error.as_deref().unwrap().contains("boom"));
    }
}
