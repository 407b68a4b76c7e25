//! Synchronous agent invocation endpoints: `POST /api/claude` and
//! `POST /api/claude/batch`. Unlike the task queue, these block the HTTP
//! response on the agent's completion — unless the caller sets `async: true`,
//! in which case the request is handed to the queue and `202 Accepted` is
//! returned immediately.

use at_agents::executor::ExecuteOptions;
use at_agents::webhook::WebhookPayload;
use at_api_types::{RequestRecord, Task, TaskMetadata};
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api_error::ApiError;
use crate::response::Envelope;
use crate::state::ApiState;

#[derive(Deserialize)]
pub struct ClaudeRequest {
    pub prompt: String,
    pub project_path: String,
    #[serde(default)]
    pub model: Option<String>,
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
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Route through the task queue instead of blocking on completion.
    #[serde(default)]
    pub r#async: bool,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Serialize)]
pub struct ClaudeResponse {
    pub success: bool,
    pub result: String,
    pub cost_usd: f64,
    pub duration_ms: u64,
    pub budget_exceeded: bool,
}

pub async fn run_claude(
    State(state): State<ApiState>,
    Json(req): Json<ClaudeRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.r#async {
        let task = submit_as_task(&state, req)?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::to_value(Envelope::ok(task).0).unwrap()),
        ));
    }

    let outcome = execute_one(&state, req).await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::to_value(ClaudeResponse {
            success: true,
            result: outcome.result,
            cost_usd: outcome.cost_usd,
            duration_ms: outcome.duration_ms,
            budget_exceeded: outcome.budget_exceeded,
        })
        .unwrap()),
    ))
}

pub async fn run_claude_batch(
    State(state): State<ApiState>,
    Json(reqs): Json<Vec<ClaudeRequest>>,
) -> Json<Envelope<Vec<Result<ClaudeResponse, String>>>> {
    let mut results = Vec::with_capacity(reqs.len());
    for req in reqs {
        let outcome = execute_one(&state, req).await.map(|o| ClaudeResponse {
            success: true,
            result: o.result,
            cost_usd: o.cost_usd,
            duration_ms: o.duration_ms,
            budget_exceeded: o.budget_exceeded,
        });
        results.push(outcome.map_err(|e| e.to_string()));
    }
    Envelope::ok(results)
}

/// Build a `Task` from a synchronous-shaped request and hand it to the
/// shared queue, for callers that passed `async: true`.
fn submit_as_task(state: &ApiState, req: ClaudeRequest) -> Result<Task, ApiError> {
    let model = req
        .model
        .clone()
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

    Ok(state.task_queue.add_task(task)?)
}

async fn execute_one(
    state: &ApiState,
    req: ClaudeRequest,
) -> Result<at_agents::executor::ExecutionOutcome, ApiError> {
    let config = state.config.load();
    let model = req.model.clone().unwrap_or_else(|| config.default_model.clone());

    let session = match req.session_id {
        Some(id) => state.sessions.get(id)?,
        None => None,
    };

    let opts = ExecuteOptions {
        prompt: req.prompt.clone(),
        project_path: req.project_path.clone(),
        model: model.clone(),
        system_prompt: req.system_prompt.clone(),
        max_budget_usd: req.max_budget_usd.or(Some(config.max_budget_usd)),
        allowed_tools: req.allowed_tools.clone(),
        disallowed_tools: req.disallowed_tools.clone(),
        agent: req.agent.clone(),
        mcp_config: req.mcp_config.clone(),
        session_id: req.session_id,
    };

    let outcome = state.executor.execute(&opts, session.as_ref()).await;

    // A pre-check budget rejection (no spawn) never touches statistics or
    // the session; only a post-check overage (see ExecutionOutcome::budget_exceeded)
    // still counts as a completed, recorded request.
    if let Err(at_agents::executor::ExecutorError::BudgetExceeded { .. }) = &outcome {
        return outcome.map_err(ApiError::from);
    }

    let today = chrono::Utc::now().date_naive();
    state.statistics.record(
        RequestRecord {
            success: outcome.is_ok(),
            model: model.clone(),
            cost_usd: outcome.as_ref().map(|o| o.cost_usd).unwrap_or(0.0),
            input_tokens: outcome.as_ref().map(|o| o.input_tokens).unwrap_or(0),
            output_tokens: outcome.as_ref().map(|o| o.output_tokens).unwrap_or(0),
        },
        today,
    )?;

    if let (Some(session_id), Ok(outcome)) = (req.session_id, &outcome) {
        if !outcome.budget_exceeded {
            state.sessions.update(session_id, |s| {
                s.total_cost_usd += outcome.cost_usd;
                s.messages_count += 1;
            })?;
        }
    }

    if let Some(url) = req.webhook_url.clone().or_else(|| {
        if config.webhook.enabled {
            config.webhook.default_url.clone()
        } else {
            None
        }
    }) {
        let webhook = state.webhook.clone();
        let task_id = Uuid::new_v4();
        let payload = match &outcome {
            Ok(o) => WebhookPayload::task_completed(task_id, &o.result, o.cost_usd, o.duration_ms),
            Err(e) => WebhookPayload::task_failed(task_id, &e.to_string(), None),
        };
        tokio::spawn(async move { webhook.notify(&url, payload).await });
    }

    outcome.map_err(ApiError::from)
}
