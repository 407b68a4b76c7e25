//! HTTP API error types.
//!
//! Provides a unified `ApiError` enum for consistent error responses across
//! the HTTP API layer. Implements Axum's `IntoResponse` trait to automatically
//! convert errors into appropriate HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors that can occur in the HTTP API layer.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BudgetExceeded(msg) => (StatusCode::PAYMENT_REQUIRED, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({ "success": false, "error": error_message }));
        (status, body).into_response()
    }
}

impl From<at_core::locked_store::StoreError> for ApiError {
    fn from(e: at_core::locked_store::StoreError) -> Self {
        ApiError::InternalError(e.to_string())
    }
}

impl From<at_core::stores::task_store::TaskStoreError> for ApiError {
    fn from(e: at_core::stores::task_store::TaskStoreError) -> Self {
        match e {
            at_core::stores::task_store::TaskStoreError::NotFound(id) => {
                ApiError::NotFound(format!("task {id} not found"))
            }
            at_core::stores::task_store::TaskStoreError::IllegalTransition { .. } => {
                ApiError::Conflict(e.to_string())
            }
            at_core::stores::task_store::TaskStoreError::Store(inner) => inner.into(),
        }
    }
}

impl From<at_agents::executor::ExecutorError> for ApiError {
    fn from(e: at_agents::executor::ExecutorError) -> Self {
        match e {
            at_agents::executor::ExecutorError::BudgetExceeded { .. } => {
                ApiError::BudgetExceeded(e.to_string())
            }
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_found_response() {
        let error = ApiError::NotFound("task not found".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        assert!(body_str.contains("\"error\""));
        assert!(body_str.contains("task not found"));
    }

    #[tokio::test]
    async fn test_bad_request_response() {
        let error = ApiError::BadRequest("invalid input".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_budget_exceeded_response() {
        let error = ApiError::BudgetExceeded("over budget".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[tokio::test]
    async fn test_internal_error_response() {
        let error = ApiError::InternalError("database connection failed".to_string());
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        assert!(body_str.contains("\"error\""));
        assert!(body_str.contains("database connection failed"));
    }
}
