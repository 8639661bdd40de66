//! Jira Cloud client (REST API v3).
//!
//! Authentication is basic auth with the account email and an API token.
//! Descriptions travel as Atlassian Document Format; we write single-paragraph
//! documents and flatten text nodes when reading.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::credentials::TrackerCredential;
use crate::error::TrackerError;
use crate::tracker::{
    FieldMeta, IssueType, Page, Project, Sprint, Ticket, TicketDraft, TicketFields, TicketPage,
    TicketPatch, TrackerClient, TrackerKind, UserRef, send_with_retry,
};

const TRACKER: &str = "jira";

pub struct JiraClient {
    http: Client,
    auth_header: String,
    base_url: String,
    project: Option<String>,
    retries: u32,
}

impl JiraClient {
    pub fn new(
        http: Client,
        credential: &TrackerCredential,
        project: Option<String>,
        retries: u32,
    ) -> Self {
        let token = base64::engine::general_purpose::STANDARD.encode(format!(
            "{}:{}",
            credential.email,
            credential.secret.expose_secret()
        ));
        Self {
            http,
            auth_header: format!("Basic {token}"),
            base_url: format!("https://{}", credential.base_domain),
            project,
            retries,
        }
    }

    fn api(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path)
    }

    fn agile(&self, path: &str) -> String {
        format!("{}/rest/agile/1.0/{}", self.base_url, path)
    }

    fn project_key(&self) -> Result<&str, TrackerError> {
        self.project
            .as_deref()
            .ok_or(TrackerError::NotSupported {
                tracker: TRACKER,
                capability: "project-scoped call without a project",
            })
    }

    async fn request<T: for<'de> Deserialize<'de>>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, TrackerError> {
        let text = self.request_raw(method, url, body).await?;
        serde_json::from_str(&text).map_err(|e| TrackerError::Decode {
            tracker: TRACKER,
            reason: e.to_string(),
        })
    }

    async fn request_raw(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<String, TrackerError> {
        send_with_retry(self.retries, || async {
            tracing::debug!(%method, url, "jira request");
            let mut req = self
                .http
                .request(method.clone(), url)
                .header("Authorization", &self.auth_header)
                .header("Accept", "application/json");
            if let Some(body) = body {
                req = req.json(body);
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
        .await
    }

    fn map_not_found(err: TrackerError, id: &str) -> TrackerError {
        match err {
            TrackerError::Status { status: 404, .. } => {
                TrackerError::TicketNotFound(id.to_string())
            }
            other => other,
        }
    }
}

#[async_trait]
impl TrackerClient for JiraClient {
    fn kind(&self) -> TrackerKind {
        TrackerKind::Jira
    }

    async fn list_projects(&self) -> Result<Vec<Project>, TrackerError> {
        let page: ProjectSearch = self
            .request(reqwest::Method::GET, &self.api("project/search"), None)
            .await?;
        Ok(page
            .values
            .into_iter()
            .map(|p| Project {
                id: p.id,
                key: p.key,
                name: p.name,
            })
            .collect())
    }

    async fn list_tickets(&self, page: Page) -> Result<TicketPage, TrackerError> {
        let jql = format!("project = {} ORDER BY created DESC", self.project_key()?);
        let url = format!(
            "{}?jql={}&startAt={}&maxResults={}&fields=summary,description,status,issuetype",
            self.api("search"),
            urlencoding::encode(&jql),
            page.offset,
            page.limit
        );

        let result: IssueSearch = self.request(reqwest::Method::GET, &url, None).await?;
        let seen = page.offset + result.issues.len();
        let next_offset = (seen < result.total).then_some(seen);

        Ok(TicketPage {
            tickets: result.issues.into_iter().map(Issue::into_ticket).collect(),
            next_offset,
        })
    }

    async fn get_ticket(&self, id: &str) -> Result<Ticket, TrackerError> {
        let url = format!(
            "{}?fields=summary,description,status,issuetype",
            self.api(&format!("issue/{id}"))
        );
        let issue: Issue = self
            .request(reqwest::Method::GET, &url, None)
            .await
            .map_err(|e| Self::map_not_found(e, id))?;
        Ok(issue.into_ticket())
    }

    async fn create_ticket(&self, draft: &TicketDraft) -> Result<Ticket, TrackerError> {
        let mut fields = serde_json::json!({
            "project": { "key": self.project_key()? },
            "summary": draft.summary,
            "issuetype": { "name": draft.issue_type.as_deref().unwrap_or("Task") },
        });
        if let Some(description) = &draft.description {
            fields["description"] = adf_paragraph(description);
        }

        let body = serde_json::json!({ "fields": fields });
        let created: CreatedIssue = self
            .request(reqwest::Method::POST, &self.api("issue"), Some(&body))
            .await?;

        self.get_ticket(&created.key).await
    }

    async fn update_ticket(&self, id: &str, patch: &TicketPatch) -> Result<Ticket, TrackerError> {
        let mut fields = serde_json::Map::new();
        if let Some(summary) = &patch.summary {
            fields.insert("summary".into(), serde_json::json!(summary));
        }
        if let Some(description) = &patch.description {
            fields.insert("description".into(), adf_paragraph(description));
        }

        if !fields.is_empty() {
            let body = serde_json::json!({ "fields": fields });
            self.request_raw(
                reqwest::Method::PUT,
                &self.api(&format!("issue/{id}")),
                Some(&body),
            )
            .await
            .map_err(|e| Self::map_not_found(e, id))?;
        }

        // Status changes go through the transition endpoint, not fields.
        if let Some(status) = &patch.status {
            let transitions: TransitionList = self
                .request(
                    reqwest::Method::GET,
                    &self.api(&format!("issue/{id}/transitions")),
                    None,
                )
                .await
                .map_err(|e| Self::map_not_found(e, id))?;

            let transition = transitions
                .transitions
                .into_iter()
                .find(|t| t.to.name.eq_ignore_ascii_case(status))
                .ok_or_else(|| TrackerError::Decode {
                    tracker: TRACKER,
                    reason: format!("no transition to status '{status}'"),
                })?;

            let body = serde_json::json!({ "transition": { "id": transition.id } });
            self.request_raw(
                reqwest::Method::POST,
                &self.api(&format!("issue/{id}/transitions")),
                Some(&body),
            )
            .await?;
        }

        self.get_ticket(id).await
    }

    async fn delete_ticket(&self, id: &str) -> Result<(), TrackerError> {
        self.request_raw(
            reqwest::Method::DELETE,
            &self.api(&format!("issue/{id}")),
            None,
        )
        .await
        .map(|_| ())
        .map_err(|e| Self::map_not_found(e, id))
    }

    async fn find_sprint(&self, name: &str) -> Result<Option<Sprint>, TrackerError> {
        let url = format!(
            "{}?projectKeyOrId={}",
            self.agile("board"),
            urlencoding::encode(self.project_key()?)
        );
        let boards: BoardList = self.request(reqwest::Method::GET, &url, None).await?;

        for board in boards.values {
            let url = self.agile(&format!("board/{}/sprint", board.id));
            let sprints: SprintList = self.request(reqwest::Method::GET, &url, None).await?;
            if let Some(sprint) = sprints
                .values
                .into_iter()
                .find(|s| s.name.eq_ignore_ascii_case(name))
            {
                return Ok(Some(Sprint {
                    id: sprint.id.to_string(),
                    name: sprint.name,
                    state: sprint.state,
                }));
            }
        }
        Ok(None)
    }

    async fn search_users(&self, query: &str) -> Result<Vec<UserRef>, TrackerError> {
        let url = format!(
            "{}?query={}",
            self.api("user/search"),
            urlencoding::encode(query)
        );
        let users: Vec<JiraUser> = self.request(reqwest::Method::GET, &url, None).await?;
        Ok(users
            .into_iter()
            .map(|u| UserRef {
                id: u.account_id,
                display_name: u.display_name,
                email: u.email_address,
            })
            .collect())
    }

    async fn issue_types(&self) -> Result<Vec<IssueType>, TrackerError> {
        let types: Vec<JiraIssueType> = self
            .request(reqwest::Method::GET, &self.api("issuetype"), None)
            .await?;
        Ok(types
            .into_iter()
            .map(|t| IssueType {
                id: t.id,
                name: t.name,
            })
            .collect())
    }

    async fn field_metadata(&self) -> Result<Vec<FieldMeta>, TrackerError> {
        let fields: Vec<JiraField> = self
            .request(reqwest::Method::GET, &self.api("field"), None)
            .await?;
        Ok(fields
            .into_iter()
            .map(|f| FieldMeta {
                id: f.id,
                name: f.name,
            })
            .collect())
    }
}

/// Wrap plain text in a minimal ADF document.
fn adf_paragraph(text: &str) -> serde_json::Value {
    serde_json::json!({
        "type": "doc",
        "version": 1,
        "content": [{
            "type": "paragraph",
            "content": [{ "type": "text", "text": text }]
        }]
    })
}

/// Flatten an ADF document to plain text, best effort.
fn adf_to_text(value: &serde_json::Value) -> String {
    fn walk(node: &serde_json::Value, out: &mut String) {
        if let Some(text) = node.get("text").and_then(|t| t.as_str()) {
            out.push_str(text);
        }
        if let Some(children) = node.get("content").and_then(|c| c.as_array()) {
            for child in children {
                walk(child, out);
            }
        }
    }
    let mut out = String::new();
    walk(value, &mut out);
    out
}

// Wire types.

#[derive(Debug, Deserialize)]
struct ProjectSearch {
    values: Vec<JiraProject>,
}

#[derive(Debug, Deserialize)]
struct JiraProject {
    id: String,
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct IssueSearch {
    issues: Vec<Issue>,
    total: usize,
}

#[derive(Debug, Deserialize)]
struct Issue {
    key: String,
    fields: IssueFields,
}

impl Issue {
    fn into_ticket(self) -> Ticket {
        Ticket {
            id: self.key,
            fields: TicketFields {
                summary: self.fields.summary,
                description: self.fields.description.as_ref().map(adf_to_text),
                status: self.fields.status.map(|s| s.name),
                issue_type: self.fields.issuetype.map(|t| t.name),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<serde_json::Value>,
    status: Option<NamedEntity>,
    issuetype: Option<NamedEntity>,
}

#[derive(Debug, Deserialize)]
struct NamedEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

#[derive(Debug, Deserialize)]
struct TransitionList {
    transitions: Vec<Transition>,
}

#[derive(Debug, Deserialize)]
struct Transition {
    id: String,
    to: NamedEntity,
}

#[derive(Debug, Deserialize)]
struct BoardList {
    values: Vec<Board>,
}

#[derive(Debug, Deserialize)]
struct Board {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct SprintList {
    values: Vec<JiraSprint>,
}

#[derive(Debug, Deserialize)]
struct JiraSprint {
    id: u64,
    name: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    account_id: String,
    display_name: String,
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JiraIssueType {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct JiraField {
    id: String,
    name: String,
}
