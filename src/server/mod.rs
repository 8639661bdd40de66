//! Thin HTTP surface over the orchestrator.
//!
//! One streaming endpoint drives the agent; thread listing and deletion are
//! plain JSON. Caller identity arrives as an `x-user-id` header, resolved by
//! the deployment's auth proxy (session handling is not this crate's job).

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::agent::{AgentEvent, EventSink, Orchestrator, ResumeDecision, Submission};
use crate::credentials::CredentialStore;
use crate::error::{StoreError, TrackerError};
use crate::tracker::{ClientFactory, TrackerClient};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub credentials: Arc<dyn CredentialStore>,
    pub factory: Arc<ClientFactory>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/agent/stream", post(stream))
        .route("/agent/threads", get(list_threads))
        .route("/agent/thread/{id}", axum::routing::delete(delete_thread))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct StreamRequest {
    thread_id: Option<Uuid>,
    /// A new human message...
    message: Option<String>,
    /// ...or a resume decision: "continue", "update", "feedback".
    action: Option<String>,
    payload: Option<serde_json::Value>,
    /// Tracker binding for ticket work.
    ticket: Option<TicketContext>,
}

#[derive(Debug, Deserialize)]
struct TicketContext {
    credential_id: Uuid,
    project: Option<String>,
}

#[derive(Debug)]
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, message.into())
}

fn user_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(ApiError(
            StatusCode::UNAUTHORIZED,
            "missing x-user-id header".into(),
        ))
}

fn parse_submission(request: &StreamRequest) -> Result<Submission, ApiError> {
    if let Some(message) = &request.message {
        return Ok(Submission::Message(message.clone()));
    }

    let payload = request.payload.as_ref();
    let payload_str = |key: &str| {
        payload
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_str())
            .map(String::from)
    };

    match request.action.as_deref() {
        Some("continue") => Ok(Submission::Resume(ResumeDecision::Continue)),
        Some("update") => payload_str("ticket_id")
            .map(|ticket_id| Submission::Resume(ResumeDecision::Update { ticket_id }))
            .ok_or_else(|| bad_request("'update' requires payload.ticket_id")),
        Some("feedback") => payload_str("text")
            .map(|text| Submission::Resume(ResumeDecision::Feedback { text }))
            .ok_or_else(|| bad_request("'feedback' requires payload.text")),
        Some(other) => Err(bad_request(format!("unknown action '{other}'"))),
        None => Err(bad_request("body needs either 'message' or 'action'")),
    }
}

async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<StreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = user_id(&headers)?;
    let submission = parse_submission(&request)?;

    let tracker: Option<Arc<dyn TrackerClient>> = match &request.ticket {
        Some(ticket) => {
            let credential = state
                .credentials
                .resolve(ticket.credential_id, &user)
                .await
                .map_err(|e| match e {
                    TrackerError::CredentialNotFound { .. } => {
                        ApiError(StatusCode::NOT_FOUND, e.to_string())
                    }
                    other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
                })?;
            let client = state
                .factory
                .get_client(&credential, ticket.project.clone())
                .await
                .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
            Some(client)
        }
        None => None,
    };

    let (tx, rx) = tokio::sync::mpsc::channel::<AgentEvent>(64);
    let events = EventSink::new(tx.clone());
    let orchestrator = Arc::clone(&state.orchestrator);
    let thread_id = request.thread_id;

    tokio::spawn(async move {
        if let Err(err) = orchestrator
            .submit(&user, thread_id, submission, tracker, &events)
            .await
        {
            // Step failures already produced an error event inside the run;
            // this covers validation failures before any step executed.
            tracing::warn!(error = %err, "submission failed");
            events
                .send(AgentEvent::Error {
                    message: err.to_string(),
                })
                .await;
        }
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(event.kind()).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("")))
}

async fn list_threads(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = user_id(&headers)?;
    let threads = state
        .orchestrator
        .list_threads(&user)
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(threads))
}

async fn delete_thread(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = user_id(&headers)?;
    match state.orchestrator.delete_thread(id, &user).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::ThreadNotFound(_)) => {
            Err(ApiError(StatusCode::NOT_FOUND, "thread not found".into()))
        }
        Err(e) => Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: serde_json::Value) -> StreamRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn message_body_parses_to_a_message_submission() {
        let submission =
            parse_submission(&request(serde_json::json!({"message": "hello"}))).unwrap();
        assert!(matches!(submission, Submission::Message(m) if m == "hello"));
    }

    #[test]
    fn resume_actions_parse_with_payloads() {
        let submission = parse_submission(&request(serde_json::json!({
            "thread_id": Uuid::new_v4(),
            "action": "update",
            "payload": {"ticket_id": "PZ-2"}
        })))
        .unwrap();
        assert!(matches!(
            submission,
            Submission::Resume(ResumeDecision::Update { ticket_id }) if ticket_id == "PZ-2"
        ));

        let submission = parse_submission(&request(serde_json::json!({
            "action": "feedback",
            "payload": {"text": "not that one"}
        })))
        .unwrap();
        assert!(matches!(
            submission,
            Submission::Resume(ResumeDecision::Feedback { .. })
        ));
    }

    #[test]
    fn invalid_bodies_are_rejected() {
        assert!(parse_submission(&request(serde_json::json!({}))).is_err());
        assert!(parse_submission(&request(serde_json::json!({"action": "update"}))).is_err());
        assert!(parse_submission(&request(serde_json::json!({"action": "explode"}))).is_err());
    }
}
