//! The agent orchestration engine.
//!
//! The engine is a directed graph of steps over per-thread state:
//! - conversation repair for tool calls interrupted by the user
//! - a reasoning step with bound tools
//! - the self-RAG retrieval loop with a bounded retry policy
//! - the human-in-the-loop ticket-mutation workflow
//! Checkpoints are written after every step, so any thread can be resumed
//! after a suspension or a process restart.

mod agent_loop;
mod events;
mod graph;
mod mutation;
mod rag;
mod repair;
mod respond;
pub(crate) mod state;
#[cfg(test)]
pub(crate) mod testing;
mod threads;

pub use agent_loop::{Orchestrator, Submission};
pub use events::{AgentEvent, EventSink};
pub use graph::{END, Graph, GraphRunner, RunOutcome, Step, StepContext, StepOutcome};
pub use mutation::{MutationAction, MutationProposal, ResumeDecision, SuspensionToken};
pub use rag::{NO_INFORMATION_ANSWER, RagDecision};
pub use repair::{RepairOutcome, StateCorrection, fix_tool_call_sequence};
pub use respond::tool_names;
pub use state::AgentState;
pub use threads::ThreadRegistry;
