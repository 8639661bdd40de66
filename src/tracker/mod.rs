//! Uniform ticketing capability over external trackers.
//!
//! Every tracker is driven through [`TrackerClient`]; callers never see wire
//! formats. Capabilities a tracker lacks fail with
//! [`TrackerError::NotSupported`] so callers can degrade per tracker instead
//! of treating the gap as an outage.

mod azure;
mod factory;
mod jira;

pub use azure::AzureDevOpsClient;
pub use factory::ClientFactory;
pub use jira::JiraClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TrackerError;

/// Supported tracker backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerKind {
    Jira,
    AzureDevOps,
}

impl TrackerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerKind::Jira => "jira",
            TrackerKind::AzureDevOps => "azure_devops",
        }
    }
}

/// A project (Jira project / Azure DevOps team project).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub key: String,
    pub name: String,
}

/// The fields the assistant reads and renders in proposals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
}

/// A ticket as callers see it, keyed by its display id ("PZ-1", "4711").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub fields: TicketFields,
}

/// Fields for a new ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketDraft {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TicketPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl TicketPatch {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none() && self.description.is_none() && self.status.is_none()
    }
}

/// Pagination window for listing tickets.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of tickets plus the offset of the next page, if any.
#[derive(Debug, Clone)]
pub struct TicketPage {
    pub tickets: Vec<Ticket>,
    pub next_offset: Option<usize>,
}

/// A sprint / iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sprint {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// A tracker-side user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// An issue / work item type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueType {
    pub id: String,
    pub name: String,
}

/// Metadata for a ticket field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    pub id: String,
    pub name: String,
}

/// The capability surface every tracker client implements.
///
/// Core CRUD is mandatory; lookup capabilities default to
/// [`TrackerError::NotSupported`] so a tracker only implements what its API
/// actually offers.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    fn kind(&self) -> TrackerKind;

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError>;

    async fn list_tickets(&self, page: Page) -> Result<TicketPage, TrackerError>;

    async fn get_ticket(&self, id: &str) -> Result<Ticket, TrackerError>;

    async fn create_ticket(&self, draft: &TicketDraft) -> Result<Ticket, TrackerError>;

    async fn update_ticket(&self, id: &str, patch: &TicketPatch) -> Result<Ticket, TrackerError>;

    async fn delete_ticket(&self, id: &str) -> Result<(), TrackerError>;

    async fn find_sprint(&self, _name: &str) -> Result<Option<Sprint>, TrackerError> {
        Err(TrackerError::NotSupported {
            tracker: self.kind().as_str(),
            capability: "find_sprint",
        })
    }

    async fn search_users(&self, _query: &str) -> Result<Vec<UserRef>, TrackerError> {
        Err(TrackerError::NotSupported {
            tracker: self.kind().as_str(),
            capability: "search_users",
        })
    }

    async fn issue_types(&self) -> Result<Vec<IssueType>, TrackerError> {
        Err(TrackerError::NotSupported {
            tracker: self.kind().as_str(),
            capability: "issue_types",
        })
    }

    async fn field_metadata(&self) -> Result<Vec<FieldMeta>, TrackerError> {
        Err(TrackerError::NotSupported {
            tracker: self.kind().as_str(),
            capability: "field_metadata",
        })
    }
}

/// Run `op`, retrying transient failures up to `retries` extra attempts with
/// a short linear backoff. Non-transient errors return immediately.
pub(crate) async fn send_with_retry<T, F, Fut>(retries: u32, op: F) -> Result<T, TrackerError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, TrackerError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < retries => {
                attempt += 1;
                tracing::warn!(attempt, error = %err, "transient tracker failure, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(250 * attempt as u64)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_gives_up_after_fixed_count() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = send_with_retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(TrackerError::Status {
                    tracker: "jira",
                    status: 503,
                    body: "down".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        // initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_does_not_touch_permanent_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = send_with_retry(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TrackerError::TicketNotFound("PZ-1".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct StubClient;

    #[async_trait]
    impl TrackerClient for StubClient {
        fn kind(&self) -> TrackerKind {
            TrackerKind::AzureDevOps
        }

        async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
            Ok(vec![])
        }

        async fn list_tickets(&self, _page: Page) -> Result<TicketPage, TrackerError> {
            Ok(TicketPage {
                tickets: vec![],
                next_offset: None,
            })
        }

        async fn get_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
            Err(TrackerError::TicketNotFound(id.into()))
        }

        async fn create_ticket(&self, _draft: &TicketDraft) -> Result<Ticket, TrackerError> {
            unimplemented!()
        }

        async fn update_ticket(
            &self,
            _id: &str,
            _patch: &TicketPatch,
        ) -> Result<Ticket, TrackerError> {
            unimplemented!()
        }

        async fn delete_ticket(&self, _id: &str) -> Result<(), TrackerError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unimplemented_capability_is_distinct() {
        let client = StubClient;
        let err = client.search_users("ada").await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::NotSupported {
                tracker: "azure_devops",
                capability: "search_users"
            }
        ));
    }
}
