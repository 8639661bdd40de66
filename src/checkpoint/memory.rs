//! In-memory checkpoint store for tests and the `--memory` dev mode.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use crate::error::StoreError;

#[derive(Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<Uuid, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(&thread_id)
            .and_then(|history| history.last())
            .cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let mut threads = self.threads.write().await;
        threads
            .entry(checkpoint.thread_id)
            .or_default()
            .push(checkpoint);
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ThreadSummary>, StoreError> {
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .values()
            .filter_map(|history| history.last())
            .filter(|c| c.user_id == user_id)
            .map(ThreadSummary::from_checkpoint)
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, thread_id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let mut threads = self.threads.write().await;
        let owned = threads
            .get(&thread_id)
            .and_then(|history| history.last())
            .is_some_and(|c| c.user_id == user_id);
        if owned {
            threads.remove(&thread_id);
        }
        Ok(owned)
    }

    async fn owner(&self, thread_id: Uuid) -> Result<Option<String>, StoreError> {
        let threads = self.threads.read().await;
        Ok(threads
            .get(&thread_id)
            .and_then(|history| history.last())
            .map(|c| c.user_id.clone()))
    }
}
