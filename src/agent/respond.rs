//! The reasoning step: one LLM call with bound tools.

use async_trait::async_trait;

use crate::agent::events::{AgentEvent, EventSink};
use crate::agent::graph::{Step, StepContext, StepOutcome};
use crate::agent::state::AgentState;
use crate::error::{Error, LlmError};
use crate::llm::{Message, Role, ToolDefinition};

/// Names of the tools the model can invoke.
pub mod tool_names {
    pub const SEARCH_KNOWLEDGE_BASE: &str = "search_knowledge_base";
    pub const CREATE_TICKET: &str = "create_ticket";
    pub const UPDATE_TICKET: &str = "update_ticket";
    pub const DELETE_TICKET: &str = "delete_ticket";

    pub const MUTATIONS: [&str; 3] = [CREATE_TICKET, UPDATE_TICKET, DELETE_TICKET];
}

const SYSTEM_PROMPT: &str = "You are a ticketing assistant. Answer questions from the \
knowledge base via search_knowledge_base, and create, update or delete tickets with the \
ticket tools when the user asks for it. Every ticket mutation is reviewed by the user \
before it is applied, so propose exactly what they asked for. If neither applies, answer \
directly and concisely.";

/// Calls the model with the conversation and the bound tool set, then appends
/// the assistant message. Tool selection routing happens on the edges.
pub struct RespondStep;

#[async_trait]
impl Step for RespondStep {
    async fn run(
        &self,
        state: &mut AgentState,
        ctx: &StepContext,
        events: &EventSink,
    ) -> Result<StepOutcome, Error> {
        // The graph has no cycle limit; this is the reasoning step's own
        // bound against a model that never stops calling tools.
        let turns_this_round = state
            .messages
            .iter()
            .rev()
            .take_while(|m| m.role != Role::Human)
            .filter(|m| m.role == Role::Assistant)
            .count() as u32;
        if turns_this_round >= ctx.config.max_reason_turns {
            return Err(LlmError::InvalidResponse(format!(
                "exceeded {} reasoning turns without a final answer",
                ctx.config.max_reason_turns
            ))
            .into());
        }

        let mut messages = vec![Message::system(SYSTEM_PROMPT)];
        messages.extend(state.messages.iter().cloned());

        let turn = ctx
            .llm
            .complete_with_tools(messages, bound_tools(ctx))
            .await?;

        match turn.tool_calls.into_iter().next() {
            Some(call) => {
                if call.name == tool_names::SEARCH_KNOWLEDGE_BASE {
                    // Fresh question, fresh retrieval loop.
                    state.reset_rag();
                }
                events
                    .send(AgentEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await;
                state.push_message(Message::assistant_with_tool_call(turn.content, call));
            }
            None => {
                events
                    .send(AgentEvent::Token {
                        content: turn.content.clone(),
                    })
                    .await;
                state.push_message(Message::assistant(turn.content));
            }
        }

        Ok(StepOutcome::Next)
    }
}

/// The tool set offered to the model. Mutation tools are only bound when a
/// tracker client is attached to the submission.
fn bound_tools(ctx: &StepContext) -> Vec<ToolDefinition> {
    let mut tools = vec![ToolDefinition {
        name: tool_names::SEARCH_KNOWLEDGE_BASE.into(),
        description: "Search the knowledge base for documents relevant to a question.".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "The question to search for" }
            },
            "required": ["query"]
        }),
    }];

    if ctx.tracker.is_some() {
        tools.push(ToolDefinition {
            name: tool_names::CREATE_TICKET.into(),
            description: "Create a new ticket in the current project.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "summary": { "type": "string" },
                    "description": { "type": "string" },
                    "issue_type": { "type": "string" }
                },
                "required": ["summary"]
            }),
        });
        tools.push(ToolDefinition {
            name: tool_names::UPDATE_TICKET.into(),
            description: "Update fields of an existing ticket.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "ticket_id": { "type": "string" },
                    "summary": { "type": "string" },
                    "description": { "type": "string" },
                    "status": { "type": "string" }
                },
                "required": ["ticket_id"]
            }),
        });
        tools.push(ToolDefinition {
            name: tool_names::DELETE_TICKET.into(),
            description: "Delete a ticket.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "ticket_id": { "type": "string" }
                },
                "required": ["ticket_id"]
            }),
        });
    }

    tools
}

/// Edge guard: the model asked to search the knowledge base.
pub fn wants_search(state: &AgentState) -> bool {
    state
        .open_invocation()
        .is_some_and(|c| c.name == tool_names::SEARCH_KNOWLEDGE_BASE)
}

/// Edge guard: the model asked for a ticket mutation.
pub fn wants_mutation(state: &AgentState) -> bool {
    state
        .open_invocation()
        .is_some_and(|c| tool_names::MUTATIONS.contains(&c.name.as_str()))
}

/// Edge guard: nothing left to do after the assistant message.
pub fn is_final_answer(state: &AgentState) -> bool {
    state.open_invocation().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{FakeLlm, FakeTracker, test_ctx};
    use crate::llm::{AssistantTurn, ToolCall};
    use std::sync::Arc;

    #[tokio::test]
    async fn plain_answer_appends_assistant_message() {
        let llm = Arc::new(FakeLlm::with_turns(vec![AssistantTurn {
            content: "Here you go.".into(),
            tool_calls: vec![],
        }]));
        let ctx = test_ctx().with_llm(llm).build();
        let mut state = AgentState::default();
        state.push_message(Message::human("hi"));

        RespondStep
            .run(&mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();

        assert!(is_final_answer(&state));
        assert_eq!(state.messages.last().unwrap().content, "Here you go.");
    }

    #[tokio::test]
    async fn tool_call_sets_up_routing_guards() {
        let llm = Arc::new(FakeLlm::with_turns(vec![AssistantTurn {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "T1".into(),
                name: tool_names::DELETE_TICKET.into(),
                arguments: serde_json::json!({"ticket_id": "PZ-1"}),
            }],
        }]));
        let ctx = test_ctx()
            .with_llm(llm)
            .with_tracker(Arc::new(FakeTracker::with_ticket("PZ-1", "Bug")))
            .build();
        let mut state = AgentState::default();
        state.push_message(Message::human("delete PZ-1"));

        RespondStep
            .run(&mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();

        assert!(wants_mutation(&state));
        assert!(!wants_search(&state));
        assert!(!is_final_answer(&state));
    }

    #[tokio::test]
    async fn search_call_resets_the_rag_loop() {
        let llm = Arc::new(FakeLlm::with_turns(vec![AssistantTurn {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: "T2".into(),
                name: tool_names::SEARCH_KNOWLEDGE_BASE.into(),
                arguments: serde_json::json!({"query": "q"}),
            }],
        }]));
        let ctx = test_ctx().with_llm(llm).build();
        let mut state = AgentState {
            rag_retries: 2,
            ..Default::default()
        };
        state.push_message(Message::human("new question"));

        RespondStep
            .run(&mut state, &ctx, &EventSink::discard())
            .await
            .unwrap();

        assert_eq!(state.rag_retries, 0);
        assert!(wants_search(&state));
    }

    #[tokio::test]
    async fn mutation_tools_require_a_tracker() {
        let ctx = test_ctx().build();
        let tools = bound_tools(&ctx);
        assert_eq!(tools.len(), 1);

        let ctx = test_ctx()
            .with_tracker(Arc::new(FakeTracker::with_ticket("PZ-1", "Bug")))
            .build();
        let tools = bound_tools(&ctx);
        assert_eq!(tools.len(), 4);
    }

    #[tokio::test]
    async fn runaway_tool_loop_is_bounded() {
        let llm = Arc::new(FakeLlm::always("ok"));
        let mut builder = test_ctx().with_llm(llm);
        builder.config.max_reason_turns = 2;
        let ctx = builder.build();

        let mut state = AgentState::default();
        state.push_message(Message::human("hi"));
        state.push_message(Message::assistant("a"));
        state.push_message(Message::assistant("b"));

        let err = RespondStep
            .run(&mut state, &ctx, &EventSink::discard())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("reasoning turns"));
    }
}
