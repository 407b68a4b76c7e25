use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a queued task.
///
/// Legal transitions: `Pending -> Processing`, `Processing -> Completed|Failed`,
/// and `Pending|Processing -> Cancelled`. Every other state is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Whether transitioning from `self` to `next` is legal.
    pub fn can_transition_to(&self, next: &TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Pending, Cancelled)
                | (Processing, Cancelled)
        )
    }

    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Fields lifted out of a task's `prompt`/options at submission time and
/// threaded through to the agent executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskMetadata {
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
    pub mcp_config: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// A durable unit of asynchronous work dispatched by the task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default = "default_priority")]
    pub priority: u8,
    pub prompt: String,
    pub project_path: String,
    pub model: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub metadata: TaskMetadata,
}

fn default_priority() -> u8 {
    5
}

impl Task {
    pub fn new(prompt: impl Into<String>, project_path: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            status: TaskStatus::Pending,
            priority: default_priority(),
            prompt: prompt.into(),
            project_path: project_path.into(),
            model: model.into(),
            result: None,
            error: None,
            duration_ms: None,
            cost_usd: 0.0,
            metadata: TaskMetadata::default(),
        }
    }

    /// Dispatch ordering key: higher priority first, then older `created_at` first.
    pub fn dispatch_key(&self) -> (std::cmp::Reverse<u8>, DateTime<Utc>) {
        (std::cmp::Reverse(self.priority), self.created_at)
    }
}
