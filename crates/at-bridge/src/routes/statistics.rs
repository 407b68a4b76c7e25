use axum::{
    extract::{Query, State},
    Json,
};
use at_api_types::{DailyStats, ModelStats, Statistics};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::api_error::ApiError;
use crate::response::Envelope;
use crate::state::ApiState;

/// `GET /api/statistics` — same body as `/summary`, kept for callers that
/// hit the bare collection path.
pub async fn root(State(state): State<ApiState>) -> Result<Json<Envelope<Statistics>>, ApiError> {
    Ok(Envelope::ok(state.statistics.summary()?))
}

pub async fn summary(State(state): State<ApiState>) -> Result<Json<Envelope<Statistics>>, ApiError> {
    Ok(Envelope::ok(state.statistics.summary()?))
}

#[derive(Deserialize)]
pub struct DailyQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

pub async fn daily(
    State(state): State<ApiState>,
    Query(q): Query<DailyQuery>,
) -> Result<Json<Envelope<Vec<DailyStats>>>, ApiError> {
    Ok(Envelope::ok(state.statistics.daily_recent(q.limit)?))
}

#[derive(Deserialize)]
pub struct RangeQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

pub async fn range(
    State(state): State<ApiState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<Envelope<Vec<DailyStats>>>, ApiError> {
    Ok(Envelope::ok(state.statistics.daily_range(q.start, q.end)?))
}

#[derive(Deserialize)]
pub struct TopModelsQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    10
}

pub async fn top_models(
    State(state): State<ApiState>,
    Query(q): Query<TopModelsQuery>,
) -> Result<Json<Envelope<Vec<(String, ModelStats)>>>, ApiError> {
    Ok(Envelope::ok(state.statistics.top_models(q.limit)?))
}
