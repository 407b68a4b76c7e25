//! End-to-end HTTP API tests against the real router, store, and
//! config -- no mocked transport layer.

use at_bridge::routes::build_router;
use at_bridge::state::ApiState;
use at_core::config::Config;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

fn test_state() -> ApiState {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = dir.path().to_string_lossy().into_owned();
    config.rate_limit.max_requests = 1000;
    std::mem::forget(dir);
    ApiState::new(config)
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let router = build_router(test_state());
    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn submit_list_get_cancel_and_set_priority_task() {
    let router = build_router(test_state());

    let submit = json_request(
        Method::POST,
        "/api/tasks/async",
        json!({"prompt": "summarize the README", "project_path": "/tmp/proj"}),
    );
    let resp = router.clone().oneshot(submit).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    assert_eq!(created["success"], true);
    let id = created["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["data"]["status"], "pending");

    let list_req = Request::builder().uri("/api/tasks").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(list_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let listed = body_json(resp).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let get_req = Request::builder()
        .uri(format!("/api/tasks/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(get_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let priority_req = json_request(Method::PATCH, &format!("/api/tasks/{id}/priority"), json!({"priority": 9}));
    let resp = router.clone().oneshot(priority_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let reprioritized = body_json(resp).await;
    assert_eq!(reprioritized["data"]["priority"], 9);

    let bad_priority_req = json_request(Method::PATCH, &format!("/api/tasks/{id}/priority"), json!({"priority": 11}));
    let resp = router.clone().oneshot(bad_priority_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let cancel_req = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/tasks/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(cancel_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let cancelled = body_json(resp).await;
    assert_eq!(cancelled["data"]["status"], "cancelled");
}

#[tokio::test]
async fn get_missing_task_is_404() {
    let router = build_router(test_state());
    let req = Request::builder()
        .uri(format!("/api/tasks/{}", uuid::Uuid::new_v4()))
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn queue_status_reflects_submitted_tasks() {
    let router = build_router(test_state());

    let submit = json_request(
        Method::POST,
        "/api/tasks/async",
        json!({"prompt": "x", "project_path": "/tmp/proj"}),
    );
    router.clone().oneshot(submit).await.unwrap();

    let req = Request::builder()
        .uri("/api/tasks/queue/status")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let status = body_json(resp).await;
    assert_eq!(status["data"]["pending"], 1);
    assert_eq!(status["data"]["processing"], 0);
}

#[tokio::test]
async fn config_endpoint_exposes_live_values() {
    let router = build_router(test_state());
    let req = Request::builder().uri("/api/config").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let config = body_json(resp).await;
    assert!(config["data"]["port"].is_number());
}

#[tokio::test]
async fn statistics_summary_is_empty_for_fresh_store() {
    let router = build_router(test_state());
    let req = Request::builder().uri("/api/statistics/summary").body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"]["requests"]["total"], 0);
}

#[tokio::test]
async fn create_list_search_and_continue_session() {
    let router = build_router(test_state());

    let create = json_request(Method::POST, "/api/sessions", json!({"project_path": "/tmp/proj"}));
    let resp = router.clone().oneshot(create).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created = body_json(resp).await;
    let id = created["data"]["id"].as_str().unwrap().to_string();

    let list_req = Request::builder().uri("/api/sessions").body(Body::empty()).unwrap();
    let resp = router.clone().oneshot(list_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let listed = body_json(resp).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let search_req = Request::builder()
        .uri(format!("/api/sessions/search?q={}", &id[..8]))
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(search_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let found = body_json(resp).await;
    assert_eq!(found["data"].as_array().unwrap().len(), 1);

    let status_req = json_request(Method::PATCH, &format!("/api/sessions/{id}/status"), json!({"status": "archived"}));
    let resp = router.clone().oneshot(status_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let updated = body_json(resp).await;
    assert_eq!(updated["data"]["status"], "archived");

    let continue_req = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/sessions/{id}/continue"))
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(continue_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let continued = body_json(resp).await;
    assert_eq!(continued["data"]["status"], "active");

    let delete_req = Request::builder()
        .method(Method::DELETE)
        .uri(format!("/api/sessions/{id}"))
        .body(Body::empty())
        .unwrap();
    let resp = router.clone().oneshot(delete_req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
