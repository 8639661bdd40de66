//! PostgreSQL-backed checkpoint store.

use async_trait::async_trait;
use deadpool_postgres::{Config, Pool, Runtime};
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use crate::config::DatabaseConfig;
use crate::error::StoreError;

mod embedded {
    refinery::embed_migrations!("migrations");
}

pub struct PgCheckpointStore {
    pool: Pool,
}

impl PgCheckpointStore {
    /// Connect, verify the pool, and apply pending migrations.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Pool(e.to_string()))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let report = embedded::migrations::runner()
            .run_async(&mut **conn)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        if !report.applied_migrations().is_empty() {
            tracing::info!(
                applied = report.applied_migrations().len(),
                "database migrations applied"
            );
        }
        Ok(())
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        Ok(self.pool.get().await?)
    }

    fn row_to_checkpoint(row: &tokio_postgres::Row) -> Result<Checkpoint, StoreError> {
        let thread_id: Uuid = row.get("thread_id");
        let state: serde_json::Value = row.get("state");
        let state = serde_json::from_value(state)
            .map_err(|e| StoreError::Codec(thread_id, e.to_string()))?;
        Ok(Checkpoint {
            thread_id,
            user_id: row.get("user_id"),
            seq: row.get("seq"),
            step: row.get("step"),
            state,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, thread_id: Uuid) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT thread_id, user_id, seq, step, state, created_at
                 FROM checkpoints WHERE thread_id = $1
                 ORDER BY seq DESC LIMIT 1",
                &[&thread_id],
            )
            .await?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let state = serde_json::to_value(&checkpoint.state)
            .map_err(|e| StoreError::Codec(checkpoint.thread_id, e.to_string()))?;

        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO checkpoints (thread_id, user_id, seq, step, state, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
            &[
                &checkpoint.thread_id,
                &checkpoint.user_id,
                &checkpoint.seq,
                &checkpoint.step,
                &state,
                &checkpoint.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<ThreadSummary>, StoreError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT DISTINCT ON (thread_id)
                        thread_id, user_id, seq, step, state, created_at
                 FROM checkpoints WHERE user_id = $1
                 ORDER BY thread_id, seq DESC",
                &[&user_id],
            )
            .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(ThreadSummary::from_checkpoint(&Self::row_to_checkpoint(
                row,
            )?));
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn delete(&self, thread_id: Uuid, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn().await?;
        let deleted = conn
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = $1 AND user_id = $2",
                &[&thread_id, &user_id],
            )
            .await?;
        Ok(deleted > 0)
    }

    async fn owner(&self, thread_id: Uuid) -> Result<Option<String>, StoreError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT user_id FROM checkpoints WHERE thread_id = $1 LIMIT 1",
                &[&thread_id],
            )
            .await?;
        Ok(row.map(|r| r.get("user_id")))
    }
}
