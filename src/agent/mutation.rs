//! Human-in-the-loop ticket mutations.
//!
//! `propose_mutation` gathers what a reviewer needs to see, parks a
//! [`SuspensionToken`] on the thread and suspends. `apply_mutation` runs on
//! resume and consumes the token exactly once; an invalid retarget restores
//! it and suspends again, so the workflow stays resumable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::events::EventSink;
use crate::agent::graph::{Step, StepContext, StepOutcome};
use crate::agent::respond::tool_names;
use crate::agent::state::AgentState;
use crate::error::{AgentError, Error, TrackerError};
use crate::llm::ToolCall;
use crate::tracker::{Ticket, TicketDraft, TicketPatch, TrackerClient};

/// Which mutation is being proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Create,
    Update,
    Delete,
}

impl MutationAction {
    fn verb(&self) -> &'static str {
        match self {
            MutationAction::Create => "created",
            MutationAction::Update => "updated",
            MutationAction::Delete => "deleted",
        }
    }
}

/// The human-reviewable proposal carried by a suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationProposal {
    pub action: MutationAction,
    /// Target ticket; `None` for create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    /// For delete: the fields about to be lost. For update: `{from, to}`.
    /// For create: the draft.
    pub fields: serde_json::Value,
    pub summary: String,
}

/// Marker handed to the caller when the workflow pauses. Created at suspend
/// time, consumed exactly once at resume, never outlives one checkpoint
/// cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspensionToken {
    pub id: Uuid,
    /// The invocation this suspension answers; its result message is written
    /// by the apply step.
    pub tool_call_id: String,
    pub proposal: MutationProposal,
    /// The decision shapes a resume may take.
    pub decisions: Vec<String>,
}

impl SuspensionToken {
    pub fn new(tool_call_id: String, proposal: MutationProposal) -> Self {
        Self {
            id: Uuid::new_v4(),
            tool_call_id,
            proposal,
            decisions: vec!["continue".into(), "update".into(), "feedback".into()],
        }
    }
}

/// The caller's decision on a suspended proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ResumeDecision {
    /// Apply against the original target.
    Continue,
    /// Apply against a corrected target.
    Update { ticket_id: String },
    /// Cancel; no mutation is performed.
    Feedback { text: String },
}

/// Build the proposal and suspend for review.
pub struct ProposeMutationStep;

#[async_trait]
impl Step for ProposeMutationStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        _events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        let call = state
            .open_invocation()
            .cloned()
            .ok_or_else(|| AgentError::BadToolArguments(
                "mutation".into(),
                "no open tool invocation".into(),
            ))?;

        let tracker = ctx.tracker.as_ref().ok_or_else(|| {
            AgentError::BadToolArguments(
                call.name.clone(),
                "no tracker client bound to this submission".into(),
            )
        })?;

        let proposal = match build_proposal(&call, tracker.as_ref()).await {
            Ok(proposal) => proposal,
            Err(Error::Tracker(TrackerError::TicketNotFound(id))) => {
                // Target never existed; tell the model instead of suspending.
                state.upsert_tool_result(
                    &call.id,
                    format!("Ticket {id} was not found; nothing to review."),
                );
                return Ok(StepOutcome::Next);
            }
            Err(err) => return Err(err),
        };

        tracing::info!(
            thread_id = %ctx.thread_id,
            action = ?proposal.action,
            ticket = proposal.ticket_id.as_deref().unwrap_or("-"),
            "suspending for review"
        );

        let token = SuspensionToken::new(call.id, proposal);
        state.pending = Some(token.clone());
        state.status = Some("awaiting_review".into());
        Ok(StepOutcome::Suspend(token))
    }
}

/// Consume the resume decision and finish the workflow.
pub struct ApplyMutationStep;

#[async_trait]
impl Step for ApplyMutationStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        _events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        let decision = state
            .resume
            .take()
            .ok_or(AgentError::NothingToResume(ctx.thread_id))?;
        let token = state
            .pending
            .take()
            .ok_or(AgentError::NothingToResume(ctx.thread_id))?;

        let tracker = ctx.tracker.as_ref().ok_or_else(|| {
            AgentError::BadToolArguments(
                "mutation".into(),
                "no tracker client bound to this submission".into(),
            )
        })?;

        let target = match decision {
            ResumeDecision::Feedback { text } => {
                state.upsert_tool_result(
                    &token.tool_call_id,
                    format!("Mutation cancelled. User feedback: {text}"),
                );
                state.status = Some("cancelled".into());
                return Ok(StepOutcome::Next);
            }
            ResumeDecision::Update { ticket_id } => {
                // Re-validate the corrected target before touching anything.
                let valid = if token.proposal.action == MutationAction::Create {
                    false
                } else {
                    match tracker.get_ticket(&ticket_id).await {
                        Ok(_) => true,
                        Err(TrackerError::TicketNotFound(_)) => false,
                        Err(err) => {
                            // Transient lookup failure: keep the workflow
                            // resumable rather than consuming the token.
                            restore(state, token);
                            return Err(err.into());
                        }
                    }
                };
                if !valid {
                    state.upsert_tool_result(
                        &token.tool_call_id,
                        format!(
                            "Ticket {ticket_id} does not exist; the proposal is still awaiting a decision."
                        ),
                    );
                    let token = restore(state, token);
                    return Ok(StepOutcome::Suspend(token));
                }
                Some(ticket_id)
            }
            ResumeDecision::Continue => token.proposal.ticket_id.clone(),
        };

        let result = apply(&token.proposal, target.as_deref(), tracker.as_ref()).await?;
        state.upsert_tool_result(&token.tool_call_id, result);
        state.status = Some("applied".into());
        Ok(StepOutcome::Next)
    }
}

fn restore(state: &mut AgentState, token: SuspensionToken) -> SuspensionToken {
    state.pending = Some(token.clone());
    state.status = Some("awaiting_review".into());
    token
}

async fn build_proposal(
    call: &ToolCall,
    tracker: &dyn TrackerClient,
) -> Result<MutationProposal, Error> {
    let arg = |key: &str| {
        call.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    let require = |key: &str| {
        arg(key).ok_or_else(|| {
            AgentError::BadToolArguments(call.name.clone(), format!("missing '{key}'"))
        })
    };

    match call.name.as_str() {
        tool_names::DELETE_TICKET => {
            let ticket_id = require("ticket_id")?;
            let current = tracker.get_ticket(&ticket_id).await?;
            let summary = describe_delete(&current);
            Ok(MutationProposal {
                action: MutationAction::Delete,
                ticket_id: Some(ticket_id),
                fields: serde_json::to_value(&current.fields).unwrap_or_default(),
                summary,
            })
        }
        tool_names::UPDATE_TICKET => {
            let ticket_id = require("ticket_id")?;
            let patch = TicketPatch {
                summary: arg("summary"),
                description: arg("description"),
                status: arg("status"),
            };
            if patch.is_empty() {
                return Err(AgentError::BadToolArguments(
                    call.name.clone(),
                    "no fields to update".into(),
                )
                .into());
            }
            let current = tracker.get_ticket(&ticket_id).await?;
            let summary = describe_update(&current, &patch);
            Ok(MutationProposal {
                action: MutationAction::Update,
                ticket_id: Some(ticket_id),
                fields: serde_json::json!({
                    "from": current.fields,
                    "to": patch,
                }),
                summary,
            })
        }
        tool_names::CREATE_TICKET => {
            let draft = TicketDraft {
                summary: require("summary")?,
                description: arg("description"),
                issue_type: arg("issue_type"),
            };
            let summary = format!(
                "Create a new {} ticket: '{}'",
                draft.issue_type.as_deref().unwrap_or("Task"),
                draft.summary
            );
            Ok(MutationProposal {
                action: MutationAction::Create,
                ticket_id: None,
                fields: serde_json::to_value(&draft).unwrap_or_default(),
                summary,
            })
        }
        other => Err(AgentError::BadToolArguments(
            other.to_string(),
            "not a ticket mutation tool".into(),
        )
        .into()),
    }
}

async fn apply(
    proposal: &MutationProposal,
    target: Option<&str>,
    tracker: &dyn TrackerClient,
) -> Result<String, Error> {
    let verb = proposal.action.verb();
    match proposal.action {
        MutationAction::Delete => {
            let id = target.ok_or_else(|| {
                AgentError::BadToolArguments("delete_ticket".into(), "missing target".into())
            })?;
            tracker.delete_ticket(id).await?;
            Ok(format!("Successfully {verb} ticket {id}"))
        }
        MutationAction::Update => {
            let id = target.ok_or_else(|| {
                AgentError::BadToolArguments("update_ticket".into(), "missing target".into())
            })?;
            let patch: TicketPatch = proposal
                .fields
                .get("to")
                .cloned()
                .map(serde_json::from_value)
                .transpose()
                .map_err(|e| {
                    AgentError::BadToolArguments("update_ticket".into(), e.to_string())
                })?
                .unwrap_or_default();
            tracker.update_ticket(id, &patch).await?;
            Ok(format!("Successfully {verb} ticket {id}"))
        }
        MutationAction::Create => {
            let draft: TicketDraft = serde_json::from_value(proposal.fields.clone())
                .map_err(|e| AgentError::BadToolArguments("create_ticket".into(), e.to_string()))?;
            let created = tracker.create_ticket(&draft).await?;
            Ok(format!(
                "Successfully {verb} ticket {}: '{}'",
                created.id, draft.summary
            ))
        }
    }
}

fn describe_delete(ticket: &Ticket) -> String {
    format!(
        "Delete ticket {} ('{}', status: {})",
        ticket.id,
        ticket.fields.summary.as_deref().unwrap_or("untitled"),
        ticket.fields.status.as_deref().unwrap_or("unknown"),
    )
}

fn describe_update(ticket: &Ticket, patch: &TicketPatch) -> String {
    let mut changes = Vec::new();
    if let Some(summary) = &patch.summary {
        changes.push(format!("summary -> '{summary}'"));
    }
    if patch.description.is_some() {
        changes.push("description".to_string());
    }
    if let Some(status) = &patch.status {
        changes.push(format!("status -> '{status}'"));
    }
    format!("Update ticket {}: {}", ticket.id, changes.join(", "))
}
