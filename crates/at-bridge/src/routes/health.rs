use axum::{extract::State, Json};
use serde::Serialize;

use crate::response::Envelope;
use crate::state::ApiState;

#[derive(Serialize)]
pub struct HealthBody {
    status: &'static str,
    uptime_secs: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
    memory_kb: u64,
}

pub async fn health(State(state): State<ApiState>) -> Json<Envelope<HealthBody>> {
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds();
    Envelope::ok(HealthBody {
        status: "ok",
        uptime_secs,
        timestamp: chrono::Utc::now(),
        memory_kb: resident_memory_kb(),
    })
}

#[cfg(target_os = "linux")]
fn resident_memory_kb() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| {
            let resident_pages: u64 = s.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident_pages * 4)
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_kb() -> u64 {
    0
}
