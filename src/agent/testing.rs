//! Deterministic fakes for the external capabilities, shared by the agent
//! test modules.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::agent::graph::StepContext;
use crate::config::AgentConfig;
use crate::error::{LlmError, TrackerError};
use crate::knowledge::{Document, KnowledgeStore};
use crate::llm::{
    AssistantTurn, CompletionRequest, CompletionResponse, LlmProvider, Message, ToolDefinition,
};
use crate::tracker::{
    Page, Project, Ticket, TicketDraft, TicketFields, TicketPage, TicketPatch, TrackerClient,
    TrackerKind,
};

/// LLM fake: scripted replies for `complete`, scripted turns for
/// `complete_with_tools`, with a fixed fallback.
pub struct FakeLlm {
    replies: Mutex<VecDeque<String>>,
    turns: Mutex<VecDeque<AssistantTurn>>,
    fallback: String,
}

impl FakeLlm {
    pub fn always(reply: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            turns: Mutex::new(VecDeque::new()),
            fallback: reply.to_string(),
        }
    }

    pub fn with_replies(replies: Vec<String>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            turns: Mutex::new(VecDeque::new()),
            fallback: "ok".to_string(),
        }
    }

    pub fn with_turns(turns: Vec<AssistantTurn>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            turns: Mutex::new(turns.into()),
            fallback: "ok".to_string(),
        }
    }
}

#[async_trait]
impl LlmProvider for FakeLlm {
    async fn complete(&self, _req: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let content = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(CompletionResponse { content })
    }

    async fn complete_with_tools(
        &self,
        _messages: Vec<Message>,
        _tools: Vec<ToolDefinition>,
    ) -> Result<AssistantTurn, LlmError> {
        Ok(self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| AssistantTurn {
                content: self.fallback.clone(),
                tool_calls: vec![],
            }))
    }
}

/// Knowledge fake returning a fixed document set and counting retrievals.
pub struct FakeKnowledge {
    documents: Vec<Document>,
    calls: AtomicU32,
}

impl FakeKnowledge {
    pub fn empty() -> Self {
        Self::with_documents(vec![])
    }

    pub fn with_documents(documents: Vec<Document>) -> Self {
        Self {
            documents,
            calls: AtomicU32::new(0),
        }
    }

    pub fn retrieve_calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeStore for FakeKnowledge {
    async fn retrieve(&self, _question: &str) -> Result<Vec<Document>, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.clone())
    }

    async fn add(&self, _documents: Vec<Document>) -> Result<(), LlmError> {
        Ok(())
    }

    async fn delete_collection(&self, _collection_key: &str) -> Result<(), LlmError> {
        Ok(())
    }
}

/// Tracker fake with an in-memory ticket table and a mutation log.
pub struct FakeTracker {
    tickets: Mutex<HashMap<String, Ticket>>,
    deleted: Mutex<Vec<String>>,
    fail_next: Mutex<Option<TrackerError>>,
}

impl FakeTracker {
    pub fn with_ticket(id: &str, summary: &str) -> Self {
        let ticket = Ticket {
            id: id.to_string(),
            fields: TicketFields {
                summary: Some(summary.to_string()),
                description: None,
                status: Some("To Do".to_string()),
                issue_type: Some("Bug".to_string()),
            },
        };
        Self {
            tickets: Mutex::new(HashMap::from([(id.to_string(), ticket)])),
            deleted: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn ticket(&self, id: &str) -> Option<Ticket> {
        self.tickets.lock().unwrap().get(id).cloned()
    }

    /// Make the next mutating call fail with the given error.
    pub fn fail_next(&self, err: TrackerError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    fn take_failure(&self) -> Option<TrackerError> {
        self.fail_next.lock().unwrap().take()
    }
}

#[async_trait]
impl TrackerClient for FakeTracker {
    fn kind(&self) -> TrackerKind {
        TrackerKind::Jira
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        Ok(vec![])
    }

    async fn list_tickets(&self, _page: Page) -> Result<TicketPage, TrackerError> {
        Ok(TicketPage {
            tickets: self.tickets.lock().unwrap().values().cloned().collect(),
            next_offset: None,
        })
    }

    async fn get_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
        self.tickets
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::TicketNotFound(id.to_string()))
    }

    async fn create_ticket(&self, draft: &TicketDraft) -> Result<Ticket, TrackerError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut tickets = self.tickets.lock().unwrap();
        let id = format!("NEW-{}", tickets.len() + 1);
        let ticket = Ticket {
            id: id.clone(),
            fields: TicketFields {
                summary: Some(draft.summary.clone()),
                description: draft.description.clone(),
                status: Some("To Do".to_string()),
                issue_type: draft.issue_type.clone(),
            },
        };
        tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn update_ticket(&self, id: &str, patch: &TicketPatch) -> Result<Ticket, TrackerError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut tickets = self.tickets.lock().unwrap();
        let ticket = tickets
            .get_mut(id)
            .ok_or_else(|| TrackerError::TicketNotFound(id.to_string()))?;
        if let Some(summary) = &patch.summary {
            ticket.fields.summary = Some(summary.clone());
        }
        if let Some(description) = &patch.description {
            ticket.fields.description = Some(description.clone());
        }
        if let Some(status) = &patch.status {
            ticket.fields.status = Some(status.clone());
        }
        Ok(ticket.clone())
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), TrackerError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut tickets = self.tickets.lock().unwrap();
        tickets
            .remove(id)
            .ok_or_else(|| TrackerError::TicketNotFound(id.to_string()))?;
        self.deleted.lock().unwrap().push(id.to_string());
        Ok(())
    }
}

/// Builder for a [`StepContext`] with fakes plugged in.
pub struct TestCtxBuilder {
    pub thread_id: Uuid,
    pub llm: Arc<dyn LlmProvider>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub tracker: Option<Arc<dyn TrackerClient>>,
    pub config: AgentConfig,
}

pub fn test_ctx() -> TestCtxBuilder {
    TestCtxBuilder {
        thread_id: Uuid::new_v4(),
        llm: Arc::new(FakeLlm::always("ok")),
        knowledge: Arc::new(FakeKnowledge::empty()),
        tracker: None,
        config: AgentConfig::default(),
    }
}

impl TestCtxBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeStore>) -> Self {
        self.knowledge = knowledge;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn TrackerClient>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn build(self) -> StepContext {
        StepContext {
            thread_id: self.thread_id,
            llm: self.llm,
            knowledge: self.knowledge,
            tracker: self.tracker,
            config: self.config,
        }
    }
}
