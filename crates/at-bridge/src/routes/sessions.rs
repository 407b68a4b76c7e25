use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use at_agents::webhook::WebhookPayload;
use at_api_types::{Session, SessionStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::response::Envelope;
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct CreateSessionRequest {
    pub project_path: String,
    #[serde(default)]
    pub model: Option<String>,
}

/// Fire a session lifecycle webhook at the configured default URL, if any.
/// Sessions aren't queue-dispatched so there's no per-task override to
/// consult, unlike [`at_agents::queue::TaskQueue`]'s webhook delivery.
fn notify_session_webhook(state: &ApiState, payload: WebhookPayload) {
    let config = state.config.load();
    if !config.webhook.enabled {
        return;
    }
    let Some(url) = config.webhook.default_url.clone() else {
        return;
    };
    let webhook = state.webhook.clone();
    tokio::spawn(async move { webhook.notify(&url, payload).await });
}

pub async fn create_session(
    State(state): State<ApiState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Envelope<Session>>), ApiError> {
    let model = req
        .model
        .unwrap_or_else(|| state.config.load().default_model.clone());
    let session = state.sessions.create(req.project_path.clone(), model)?;
    notify_session_webhook(&state, WebhookPayload::session_created(session.id, &req.project_path));
    Ok((StatusCode::CREATED, Envelope::ok(session)))
}

#[derive(Deserialize)]
pub struct ListSessionsQuery {
    pub status: Option<SessionStatus>,
    pub project_path: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_sessions(
    State(state): State<ApiState>,
    Query(q): Query<ListSessionsQuery>,
) -> Result<Json<Envelope<Vec<Session>>>, ApiError> {
    let sessions = state
        .sessions
        .list_filtered(q.status, q.project_path.as_deref(), q.limit)?;
    Ok(Envelope::ok(sessions))
}

#[derive(Deserialize)]
pub struct SearchSessionsQuery {
    pub q: String,
    pub limit: Option<usize>,
}

pub async fn search_sessions(
    State(state): State<ApiState>,
    Query(q): Query<SearchSessionsQuery>,
) -> Result<Json<Envelope<Vec<Session>>>, ApiError> {
    Ok(Envelope::ok(state.sessions.search(&q.q, q.limit)?))
}

pub async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Session>>, ApiError> {
    state
        .sessions
        .get(id)?
        .map(Envelope::ok)
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))
}

/// `POST /api/sessions/:id/continue` re-activates a session so it can keep
/// accumulating messages/cost, rejecting sessions that are already closed.
pub async fn continue_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Session>>, ApiError> {
    let existing = state
        .sessions
        .get(id)?
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))?;

    if existing.status == SessionStatus::Closed {
        return Err(ApiError::Conflict(format!("session {id} is closed and cannot be continued")));
    }

    let session = state
        .sessions
        .update(id, |s| s.status = SessionStatus::Active)?
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))?;
    Ok(Envelope::ok(session))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
}

pub async fn update_status(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Envelope<Session>>, ApiError> {
    state
        .sessions
        .update(id, |s| s.status = req.status)?
        .map(Envelope::ok)
        .ok_or_else(|| ApiError::NotFound(format!("session {id} not found")))
}

pub async fn delete_session(State(state): State<ApiState>, Path(id): Path<Uuid>) -> Result<StatusCode, ApiError> {
    if state.sessions.delete(id)? {
        notify_session_webhook(&state, WebhookPayload::session_deleted(id));
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {id} not found")))
    }
}
