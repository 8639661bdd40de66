//! Error taxonomy for the assistant.
//!
//! Each subsystem gets its own `thiserror` enum; the top-level [`Error`]
//! unifies them for the binary and the HTTP layer. Workflow suspension is
//! deliberately NOT represented here: it is a value
//! (`agent::graph::StepOutcome::Suspend`) so that no error handler can
//! swallow it.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Agent(#[from] AgentError),
}

/// Configuration errors. Fatal, surfaced immediately, never retried.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Errors from the LLM capability.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Request(String),

    #[error("LLM returned an unusable response: {0}")]
    InvalidResponse(String),
}

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Database error: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Thread {0} not found")]
    ThreadNotFound(Uuid),

    #[error("Checkpoint for thread {0} failed to (de)serialize: {1}")]
    Codec(Uuid, String),

    #[error("Checkpoint write task aborted: {0}")]
    WriteAborted(String),
}

impl From<deadpool_postgres::PoolError> for StoreError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        StoreError::Pool(err.to_string())
    }
}

/// Errors from a ticketing tracker client or its factory.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("{capability} is not implemented for {tracker}")]
    NotSupported {
        tracker: &'static str,
        capability: &'static str,
    },

    #[error("Ticket {0} not found")]
    TicketNotFound(String),

    #[error("Credential {credential_id} not found for user")]
    CredentialNotFound { credential_id: Uuid },

    #[error("{tracker} request failed: {source}")]
    Http {
        tracker: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{tracker} returned HTTP {status}: {body}")]
    Status {
        tracker: &'static str,
        status: u16,
        body: String,
    },

    #[error("{tracker} response could not be parsed: {reason}")]
    Decode {
        tracker: &'static str,
        reason: String,
    },
}

impl TrackerError {
    /// Whether a retry at the transport layer could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Http { source, .. } => {
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            TrackerError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Graph wiring errors. These are configuration mistakes, not runtime
/// conditions, and are never retried.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("Graph has no step named '{0}'")]
    UnknownStep(String),

    #[error("No edge matched after step '{step}'")]
    NoMatchingEdge { step: String },

    #[error("Graph entry step '{0}' is not registered")]
    MissingEntry(String),
}

/// Errors raised by the orchestrator around step execution.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Thread {0} has no pending suspension to resume")]
    NothingToResume(Uuid),

    #[error("Tool call '{0}' carries malformed arguments: {1}")]
    BadToolArguments(String, String),

    #[error("Step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },
}
