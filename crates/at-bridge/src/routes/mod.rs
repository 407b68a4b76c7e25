pub mod claude;
pub mod config;
pub mod health;
pub mod sessions;
pub mod statistics;
pub mod tasks;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::rate_limit::RateLimitLayer;
use crate::state::ApiState;

pub fn build_router(state: ApiState) -> Router {
    let rate_limiter = state.rate_limiter.clone();

    Router::new()
        .route("/health", get(health::health))
        .route("/api/config", get(config::get_config))
        .route("/api/claude", post(claude::run_claude))
        .route("/api/claude/batch", post(claude::run_claude_batch))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route("/api/sessions/search", get(sessions::search_sessions))
        .route(
            "/api/sessions/:id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/api/sessions/:id/continue", post(sessions::continue_session))
        .route("/api/sessions/:id/status", axum::routing::patch(sessions::update_status))
        .route("/api/tasks/async", post(tasks::submit_task))
        .route("/api/tasks", get(tasks::list_tasks))
        .route("/api/tasks/queue/status", get(tasks::queue_status))
        .route(
            "/api/tasks/:id",
            get(tasks::get_task).delete(tasks::cancel_task),
        )
        .route("/api/tasks/:id/priority", axum::routing::patch(tasks::set_priority))
        .route("/api/statistics", get(statistics::root))
        .route("/api/statistics/summary", get(statistics::summary))
        .route("/api/statistics/daily", get(statistics::daily))
        .route("/api/statistics/range", get(statistics::range))
        .route("/api/statistics/models", get(statistics::top_models))
        .layer(RateLimitLayer::new(rate_limiter))
        .layer(axum::middleware::from_fn(at_telemetry::middleware::metrics_middleware))
        .layer(axum::middleware::from_fn(at_telemetry::tracing_setup::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
