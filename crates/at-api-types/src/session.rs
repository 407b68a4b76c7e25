use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a conversational session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
    Closed,
}

impl Default for SessionStatus {
    fn default() -> Self {
        SessionStatus::Active
    }
}

/// A conversational context with accumulated cost, shared across calls to
/// the agent CLI via `--session-id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_path: String,
    pub model: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub total_cost_usd: f64,
    #[serde(default)]
    pub messages_count: u64,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Session {
    /// Create a fresh, active session rooted at `project_path`.
    pub fn new(project_path: impl Into<String>, model: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            project_path: project_path.into(),
            model: model.into(),
            status: SessionStatus::Active,
            total_cost_usd: 0.0,
            messages_count: 0,
            metadata: HashMap::new(),
        }
    }

    /// Whether `additional_cost` would push this session past `budget`.
    pub fn would_exceed_budget(&self, budget: f64, additional_cost: f64) -> bool {
        self.total_cost_usd + additional_cost > budget
    }

    /// Whether the session is already at or past its budget.
    pub fn is_over_budget(&self, budget: f64) -> bool {
        self.total_cost_usd >= budget
    }
}
