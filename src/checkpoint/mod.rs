//! Durable thread checkpoints.
//!
//! A checkpoint is an immutable snapshot of a thread's state plus the step
//! to execute next. Checkpoints form a linear history per thread; loading
//! the latest one reconstructs everything a resumed run needs. Ownership is
//! enforced here: a thread owned by someone else is indistinguishable from a
//! missing one.

mod memory;
mod postgres;

pub use memory::MemoryCheckpointStore;
pub use postgres::PgCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::state::AgentState;
use crate::error::StoreError;
use crate::llm::Role;

/// Snapshot of one thread after one step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: Uuid,
    pub user_id: String,
    /// Position in the thread's linear checkpoint history, starting at 1.
    pub seq: i64,
    /// Step to execute when the thread is resumed.
    pub step: String,
    pub state: AgentState,
    pub created_at: DateTime<Utc>,
}

/// What thread listings show.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: Uuid,
    pub title: Option<String>,
    pub status: Option<String>,
    pub suspended: bool,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl ThreadSummary {
    /// Derive a summary from a thread's latest checkpoint.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let title = checkpoint
            .state
            .messages
            .iter()
            .find(|m| m.role == Role::Human)
            .map(|m| {
                let mut title: String = m.content.chars().take(80).collect();
                if m.content.chars().count() > 80 {
                    title.push_str("...");
                }
                title
            });

        Self {
            thread_id: checkpoint.thread_id,
            title,
            status: checkpoint.state.status.clone(),
            suspended: checkpoint.state.pending.is_some(),
            message_count: checkpoint.state.messages.len(),
            updated_at: checkpoint.created_at,
        }
    }
}

/// Storage capability for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest checkpoint for a thread, regardless of owner. Prefer
    /// [`CheckpointStore::load_owned`] anywhere a caller identity exists.
    async fn load(&self, thread_id: Uuid) -> Result<Option<Checkpoint>, StoreError>;

    /// Append a checkpoint to the thread's history.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError>;

    /// Summaries of all threads owned by a user, most recently updated
    /// first.
    async fn list(&self, user_id: &str) -> Result<Vec<ThreadSummary>, StoreError>;

    /// Delete a thread and its entire history. Returns `false` when the
    /// thread does not exist or is not owned by `user_id`.
    async fn delete(&self, thread_id: Uuid, user_id: &str) -> Result<bool, StoreError>;

    /// Owning user of a thread, if it exists.
    async fn owner(&self, thread_id: Uuid) -> Result<Option<String>, StoreError>;

    /// Latest checkpoint with ownership enforced: a thread owned by another
    /// user fails with the same not-found error a missing thread would.
    async fn load_owned(
        &self,
        thread_id: Uuid,
        user_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        match self.load(thread_id).await? {
            None => Ok(None),
            Some(checkpoint) if checkpoint.user_id == user_id => Ok(Some(checkpoint)),
            Some(_) => Err(StoreError::ThreadNotFound(thread_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;

    fn checkpoint(user: &str, content: &str) -> Checkpoint {
        let mut state = AgentState::default();
        state.push_message(Message::human(content));
        Checkpoint {
            thread_id: Uuid::new_v4(),
            user_id: user.to_string(),
            seq: 1,
            step: "respond".into(),
            state,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn load_owned_hides_foreign_threads() {
        let store = MemoryCheckpointStore::new();
        let ckpt = checkpoint("user-1", "hello");
        let thread_id = ckpt.thread_id;
        store.save(ckpt).await.unwrap();

        assert!(store.load_owned(thread_id, "user-1").await.unwrap().is_some());

        let err = store.load_owned(thread_id, "user-2").await.unwrap_err();
        assert!(matches!(err, StoreError::ThreadNotFound(id) if id == thread_id));
    }

    #[test]
    fn summary_title_truncates_long_questions() {
        let long = "x".repeat(200);
        let ckpt = checkpoint("user-1", &long);
        let summary = ThreadSummary::from_checkpoint(&ckpt);
        let title = summary.title.unwrap();
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), 83);
    }
}
