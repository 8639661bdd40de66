//! Azure DevOps client (REST `_apis` 7.1).
//!
//! Authentication is basic auth with an empty username and a PAT. Work item
//! listing goes through WIQL; create/update use JSON-patch documents.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::credentials::TrackerCredential;
use crate::error::TrackerError;
use crate::tracker::{
    FieldMeta, IssueType, Page, Project, Sprint, Ticket, TicketDraft, TicketFields, TicketPage,
    TicketPatch, TrackerClient, TrackerKind, send_with_retry,
};

const TRACKER: &str = "azure_devops";
const API_VERSION: &str = "7.1";

pub struct AzureDevOpsClient {
    http: Client,
    auth_header: String,
    /// `https://dev.azure.com/{organization}`.
    base_url: String,
    project: Option<String>,
    retries: u32,
}

impl AzureDevOpsClient {
    pub fn new(
        http: Client,
        credential: &TrackerCredential,
        project: Option<String>,
        retries: u32,
    ) -> Self {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", credential.secret.expose_secret()));
        Self {
            http,
            auth_header: format!("Basic {token}"),
            base_url: format!("https://{}", credential.base_domain),
            project,
            retries,
        }
    }

    fn org_api(&self, path: &str) -> String {
        format!("{}/_apis/{}?api-version={}", self.base_url, path, API_VERSION)
    }

    fn project_api(&self, path: &str) -> Result<String, TrackerError> {
        let project = self.project.as_deref().ok_or(TrackerError::NotSupported {
            tracker: TRACKER,
            capability: "project-scoped call without a project",
        })?;
        Ok(format!(
            "{}/{}/_apis/{}?api-version={}",
            self.base_url,
            urlencoding::encode(project),
            path,
            API_VERSION
        ))
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<(&'static str, serde_json::Value)>,
    ) -> Result<T, TrackerError> {
        let text = send_with_retry(self.retries, || async {
            tracing::debug!(%method, url, "azure devops request");
            let mut req = self
                .http
                .request(method.clone(), url)
                .header("Authorization", &self.auth_header)
                .header("Accept", "application/json");
            if let Some((content_type, body)) = &body {
                req = req
                    .header("Content-Type", *content_type)
                    .body(body.to_string());
            }

            let response = req.send().await.map_err(|source| TrackerError::Http {
                tracker: TRACKER,
                source,
            })?;

            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(TrackerError::Status {
                    tracker: TRACKER,
                    status: status.as_u16(),
                    body: text,
                });
            }
            Ok(text)
        })
        .await?;

        serde_json::from_str(&text).map_err(|e| TrackerError::Decode {
            tracker: TRACKER,
            reason: e.to_string(),
        })
    }

    fn map_not_found(err: TrackerError, id: &str) -> TrackerError {
        match err {
            TrackerError::Status { status: 404, .. } => {
                TrackerError::TicketNotFound(id.to_string())
            }
            other => other,
        }
    }

    fn patch_document(ops: &[(&str, &str)]) -> serde_json::Value {
        serde_json::Value::Array(
            ops.iter()
                .map(|(field, value)| {
                    serde_json::json!({
                        "op": "add",
                        "path": format!("/fields/{field}"),
                        "value": value,
                    })
                })
                .collect(),
        )
    }
}

#[async_trait]
impl TrackerClient for AzureDevOpsClient {
    fn kind(&self) -> TrackerKind {
        TrackerKind::AzureDevOps
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        let list: ValueList<AdoProject> = self
            .request(reqwest::Method::GET, &self.org_api("projects"), None)
            .await?;
        Ok(list
            .value
            .into_iter()
            .map(|p| Project {
                id: p.id,
                key: p.name.clone(),
                name: p.name,
            })
            .collect())
    }

    async fn list_tickets(&self, page: Page) -> Result<TicketPage, TrackerError> {
        let wiql = serde_json::json!({
            "query": "SELECT [System.Id] FROM WorkItems \
                      WHERE [System.TeamProject] = @project \
                      ORDER BY [System.ChangedDate] DESC"
        });
        let result: WiqlResult = self
            .request(
                reqwest::Method::POST,
                &self.project_api("wit/wiql")?,
                Some(("application/json", wiql)),
            )
            .await?;

        let total = result.work_items.len();
        let ids: Vec<u64> = result
            .work_items
            .iter()
            .skip(page.offset)
            .take(page.limit)
            .map(|w| w.id)
            .collect();

        if ids.is_empty() {
            return Ok(TicketPage {
                tickets: vec![],
                next_offset: None,
            });
        }

        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/_apis/wit/workitems?ids={}&api-version={}",
            self.base_url, id_list, API_VERSION
        );
        let items: ValueList<WorkItem> = self.request(reqwest::Method::GET, &url, None).await?;

        let seen = page.offset + ids.len();
        Ok(TicketPage {
            tickets: items.value.into_iter().map(WorkItem::into_ticket).collect(),
            next_offset: (seen < total).then_some(seen),
        })
    }

    async fn get_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
        let url = self.org_api(&format!("wit/workitems/{id}"));
        let item: WorkItem = self
            .request(reqwest::Method::GET, &url, None)
            .await
            .map_err(|e| Self::map_not_found(e, id))?;
        Ok(item.into_ticket())
    }

    async fn create_ticket(&self, draft: &TicketDraft) -> Result<Ticket, TrackerError> {
        let work_item_type = draft.issue_type.as_deref().unwrap_or("Task");
        let url = format!(
            "{}/{}/_apis/wit/workitems/${}?api-version={}",
            self.base_url,
            urlencoding::encode(self.project.as_deref().ok_or(
                TrackerError::NotSupported {
                    tracker: TRACKER,
                    capability: "create_ticket without a project",
                }
            )?),
            urlencoding::encode(work_item_type),
            API_VERSION
        );

        let mut ops = vec![("System.Title", draft.summary.as_str())];
        if let Some(description) = &draft.description {
            ops.push(("System.Description", description.as_str()));
        }

        let item: WorkItem = self
            .request(
                reqwest::Method::POST,
                &url,
                Some(("application/json-patch+json", Self::patch_document(&ops))),
            )
            .await?;
        Ok(item.into_ticket())
    }

    async fn update_ticket(&self, id: &str, patch: &TicketPatch) -> Result<Ticket, TrackerError> {
        let mut ops: Vec<(&str, &str)> = Vec::new();
        if let Some(summary) = &patch.summary {
            ops.push(("System.Title", summary));
        }
        if let Some(description) = &patch.description {
            ops.push(("System.Description", description));
        }
        if let Some(status) = &patch.status {
            ops.push(("System.State", status));
        }

        let url = self.org_api(&format!("wit/workitems/{id}"));
        let item: WorkItem = self
            .request(
                reqwest::Method::PATCH,
                &url,
                Some(("application/json-patch+json", Self::patch_document(&ops))),
            )
            .await
            .map_err(|e| Self::map_not_found(e, id))?;
        Ok(item.into_ticket())
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), TrackerError> {
        let url = self.org_api(&format!("wit/workitems/{id}"));
        let _: serde_json::Value = self
            .request(reqwest::Method::DELETE, &url, None)
            .await
            .map_err(|e| Self::map_not_found(e, id))?;
        Ok(())
    }

    async fn find_sprint(&self, name: &str) -> Result<Option<Sprint>, TrackerError> {
        let list: ValueList<Iteration> = self
            .request(
                reqwest::Method::GET,
                &self.project_api("work/teamsettings/iterations")?,
                None,
            )
            .await?;
        Ok(list
            .value
            .into_iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .map(|i| Sprint {
                id: i.id,
                name: i.name,
                state: i.attributes.and_then(|a| a.time_frame),
            }))
    }

    // search_users intentionally left to the default NotSupported: the Graph
    // API lives on a different host and auth scope than the PAT we hold.

    async fn issue_types(&self) -> Result<Vec<IssueType>, TrackerError> {
        let list: ValueList<WorkItemType> = self
            .request(
                reqwest::Method::GET,
                &self.project_api("wit/workitemtypes")?,
                None,
            )
            .await?;
        Ok(list
            .value
            .into_iter()
            .map(|t| IssueType {
                id: t.reference_name,
                name: t.name,
            })
            .collect())
    }

    async fn field_metadata(&self) -> Result<Vec<FieldMeta>, TrackerError> {
        let list: ValueList<AdoField> = self
            .request(reqwest::Method::GET, &self.org_api("wit/fields"), None)
            .await?;
        Ok(list
            .value
            .into_iter()
            .map(|f| FieldMeta {
                id: f.reference_name,
                name: f.name,
            })
            .collect())
    }
}

// Wire types.

#[derive(Debug, Deserialize)]
struct ValueList<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct AdoProject {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WiqlResult {
    work_items: Vec<WorkItemRef>,
}

#[derive(Debug, Deserialize)]
struct WorkItemRef {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct WorkItem {
    id: u64,
    fields: serde_json::Value,
}

impl WorkItem {
    fn into_ticket(self) -> Ticket {
        let field = |name: &str| {
            self.fields
                .get(name)
                .and_then(|v| v.as_str())
                .map(String::from)
        };
        Ticket {
            id: self.id.to_string(),
            fields: TicketFields {
                summary: field("System.Title"),
                description: field("System.Description"),
                status: field("System.State"),
                issue_type: field("System.WorkItemType"),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Iteration {
    id: String,
    name: String,
    attributes: Option<IterationAttributes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IterationAttributes {
    time_frame: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkItemType {
    name: String,
    reference_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdoField {
    name: String,
    reference_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn work_item_maps_system_fields() {
        let item: WorkItem = serde_json::from_value(serde_json::json!({
            "id": 4711,
            "fields": {
                "System.Title": "Fix crash",
                "System.State": "Active",
                "System.WorkItemType": "Bug"
            }
        }))
        .unwrap();

        let ticket = item.into_ticket();
        assert_eq!(ticket.id, "4711");
        assert_eq!(ticket.fields.summary.as_deref(), Some("Fix crash"));
        assert_eq!(ticket.fields.status.as_deref(), Some("Active"));
        assert_eq!(ticket.fields.description, None);
    }

    #[test]
    fn patch_document_shapes_json_patch_ops() {
        let doc = AzureDevOpsClient::patch_document(&[
            ("System.Title", "New title"),
            ("System.State", "Closed"),
        ]);
        let ops = doc.as_array().unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0]["op"], "add");
        assert_eq!(ops[0]["path"], "/fields/System.Title");
        assert_eq!(ops[1]["value"], "Closed");
    }
}
