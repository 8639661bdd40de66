//! Knowledge store capability.
//!
//! Retrieval is served by an external vector-store service; the engine only
//! depends on this trait. Ingestion (`add`/`delete_collection`) is batched by
//! the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// A retrieved knowledge snippet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Vector-store capability the self-RAG loop retrieves from.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetch candidate documents for a question.
    async fn retrieve(&self, question: &str) -> Result<Vec<Document>, LlmError>;

    /// Ingest a batch of documents.
    async fn add(&self, documents: Vec<Document>) -> Result<(), LlmError>;

    /// Drop an entire collection.
    async fn delete_collection(&self, collection_key: &str) -> Result<(), LlmError>;
}

/// Client for an HTTP retrieval service (`/retrieve`, `/documents`,
/// `/collections/{key}`).
pub struct HttpKnowledgeStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpKnowledgeStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    async fn retrieve(&self, question: &str) -> Result<Vec<Document>, LlmError> {
        let response = self
            .client
            .post(self.url("retrieve"))
            .json(&serde_json::json!({ "question": question }))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LlmError::Request(format!(
                "knowledge store returned HTTP {status}"
            )));
        }

        #[derive(Deserialize)]
        struct RetrieveResponse {
            documents: Vec<Document>,
        }

        let parsed: RetrieveResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        Ok(parsed.documents)
    }

    async fn add(&self, documents: Vec<Document>) -> Result<(), LlmError> {
        let response = self
            .client
            .post(self.url("documents"))
            .json(&serde_json::json!({ "documents": documents }))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Request(format!(
                "knowledge store returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn delete_collection(&self, collection_key: &str) -> Result<(), LlmError> {
        let response = self
            .client
            .delete(self.url(&format!("collections/{collection_key}")))
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(LlmError::Request(format!(
                "knowledge store returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Retrieves nothing. Used when no retrieval service is configured, so
/// knowledge questions get the explicit "no relevant information" answer
/// instead of a fabricated one.
pub struct NoopKnowledgeStore;

#[async_trait]
impl KnowledgeStore for NoopKnowledgeStore {
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
