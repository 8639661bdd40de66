//! LLM integration: conversation shapes and the provider capability.
//!
//! The orchestrator only ever talks to `dyn LlmProvider`; the concrete
//! provider is chosen at startup.

mod openai;
mod provider;

pub use openai::OpenAiChatProvider;
pub use provider::{
    AssistantTurn, CompletionRequest, CompletionResponse, LlmProvider, Message, Role, ToolCall,
    ToolDefinition,
};
