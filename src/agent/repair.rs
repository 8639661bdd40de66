//! Repair of conversation histories broken by human interruption.
//!
//! When a human message lands while a tool invocation is still waiting for
//! its result, the history violates the pairing invariant (every invocation
//! followed by exactly one correlated result). This module restores validity
//! by synthesizing an "interrupted" result. Pure functions only; callers
//! apply the returned corrections to persisted state themselves.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::llm::{Message, Role};

/// Content of the synthesized result for an interrupted invocation.
const INTERRUPTED_RESULT: &str =
    "The operation was interrupted by the user before it could complete.";

/// One mutation to apply to the persisted thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StateCorrection {
    /// Remove the raw trailing human message.
    Remove { message_id: Uuid },
    /// Insert the synthesized result.
    Insert { message: Message },
    /// Re-append the human message, id preserved.
    Reinsert { message: Message },
}

/// Result of inspecting a message sequence.
#[derive(Debug, Clone)]
pub struct RepairOutcome {
    /// Sequence ready for immediate re-invocation of the reasoning step.
    pub prepared: Vec<Message>,
    /// Operations to apply to the persisted thread. Empty when no repair was
    /// needed.
    pub corrections: Vec<StateCorrection>,
}

impl RepairOutcome {
    pub fn was_repaired(&self) -> bool {
        !self.corrections.is_empty()
    }
}

/// Inspect the tail of a message sequence and synthesize the missing tool
/// result if the last invocation was interrupted by a human message.
///
/// Deterministic and free of I/O. Sequences shorter than two messages are
/// never considered broken, and repairing an already-repaired sequence is the
/// identity transform.
pub fn fix_tool_call_sequence(messages: &[Message]) -> RepairOutcome {
    let identity = || RepairOutcome {
        prepared: messages.to_vec(),
        corrections: Vec::new(),
    };

    let (invocation, human) = match messages {
        [.., second_last, last]
            if second_last.is_tool_invocation() && last.role == Role::Human =>
        {
            match &second_last.tool_call {
                Some(call) => (call.clone(), last.clone()),
                None => return identity(),
            }
        }
        _ => return identity(),
    };

    let synthesized = Message::tool_result(invocation.id, INTERRUPTED_RESULT);

    let mut prepared = messages[..messages.len() - 1].to_vec();
    prepared.push(synthesized.clone());
    prepared.push(human.clone());

    RepairOutcome {
        prepared,
        corrections: vec![
            StateCorrection::Remove {
                message_id: human.id,
            },
            StateCorrection::Insert {
                message: synthesized,
            },
            StateCorrection::Reinsert { message: human },
        ],
    }
}

/// Graph step wrapping [`fix_tool_call_sequence`].
///
/// Runs first on every submission. When it repairs, any suspension parked on
/// the thread is dropped as well: its invocation just received the
/// synthesized "interrupted" result, so the token can never be applied.
pub struct RepairStep;

#[async_trait::async_trait]
impl crate::agent::graph::Step for RepairStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &crate::agent::graph::StepContext,
        _events: &crate::agent::events::EventSink,
    ) -> Result<crate::agent::graph::StepOutcome, crate::error::Error> {
        let outcome = fix_tool_call_sequence(&state.messages);
        if outcome.was_repaired() {
            tracing::info!(thread_id = %ctx.thread_id, "repaired interrupted tool call");
            apply_corrections(state, &outcome.corrections);
            state.pending = None;
            state.resume = None;
            state.status = Some("interrupted".into());
        }
        Ok(crate::agent::graph::StepOutcome::Next)
    }
}

/// Apply corrections from [`fix_tool_call_sequence`] to persisted state.
pub fn apply_corrections(state: &mut AgentState, corrections: &[StateCorrection]) {
    for correction in corrections {
        match correction {
            StateCorrection::Remove { message_id } => {
                state.messages.retain(|m| m.id != *message_id);
            }
            StateCorrection::Insert { message } | StateCorrection::Reinsert { message } => {
                state.messages.push(message.clone());
            }
        }
    }
}
