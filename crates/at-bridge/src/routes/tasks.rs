use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use at_api_types::{Task, TaskMetadata, TaskStatus};
use serde::Deserialize;
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::response::Envelope;
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct SubmitTaskRequest {
    pub prompt: String,
    pub project_path: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub max_budget_usd: Option<f64>,
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    #[serde(default)]
    pub disallowed_tools: Vec<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub mcp_config: Option<serde_json::Value>,
}

pub async fn submit_task(
    State(state): State<ApiState>,
    Json(req): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<Envelope<Task>>), ApiError> {
    let model = req
        .model
        .unwrap_or_else(|| state.config.load().default_model.clone());

    let mut task = Task::new(req.prompt, req.project_path, model);
    if let Some(priority) = req.priority {
        task.priority = priority;
    }
    task.metadata = TaskMetadata {
        webhook_url: req.webhook_url,
        session_id: req.session_id,
        system_prompt: req.system_prompt,
        max_budget_usd: req.max_budget_usd,
        allowed_tools: req.allowed_tools,
        disallowed_tools: req.disallowed_tools,
        agent: req.agent,
        mcp_config: req.mcp_config,
        extra: Default::default(),
    };

    // Route through the shared queue so the enqueue kick wakes the
    // scheduler immediately instead of waiting for the next ~1 Hz tick.
    let task = state.task_queue.add_task(task)?;
    Ok((StatusCode::CREATED, Envelope::ok(task)))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
}

pub async fn list_tasks(
    State(state): State<ApiState>,
    Query(q): Query<ListTasksQuery>,
) -> Result<Json<Envelope<Vec<Task>>>, ApiError> {
    Ok(Envelope::ok(state.task_queue.list_filtered(q.status, q.limit)?))
}

pub async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Task>>, ApiError> {
    state
        .task_queue
        .get(id)?
        .map(Envelope::ok)
        .ok_or_else(|| ApiError::NotFound(format!("task {id} not found")))
}

#[derive(Deserialize)]
pub struct SetPriorityRequest {
    pub priority: u8,
}

pub async fn set_priority(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetPriorityRequest>,
) -> Result<Json<Envelope<Task>>, ApiError> {
    if !(1..=10).contains(&req.priority) {
        return Err(ApiError::BadRequest("priority must be between 1 and 10".into()));
    }
    Ok(Envelope::ok(state.task_queue.set_priority(id, req.priority)?))
}

/// `DELETE /api/tasks/:id` cancels the task (there is no hard-delete route).
pub async fn cancel_task(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Envelope<Task>>, ApiError> {
    if state.task_queue.get(id)?.is_none() {
        return Err(ApiError::NotFound(format!("task {id} not found")));
    }
    state
        .task_queue
        .cancel(id)
        .await?
        .map(Envelope::ok)
        .ok_or_else(|| ApiError::BadRequest(format!("task {id} cannot be cancelled in its current state")))
}

pub async fn queue_status(State(state): State<ApiState>) -> Json<Envelope<at_agents::queue::QueueStatus>> {
    Envelope::ok(state.task_queue.status().await)
}
