//! Fixed-window rate limiting middleware for the HTTP API.
//!
//! Each client IP gets its own window: the first request in a window starts
//! a `window_ms` timer; up to `max_requests` are allowed before the timer
//! elapses, at which point the window resets. This is simpler than a token
//! bucket and matches what clients see from `Retry-After`: a single
//! countdown to the next window, not a continuous refill rate.
//!
//! Client IP is extracted from `X-Forwarded-For` (first entry) or
//! `X-Real-IP`, falling back to `"unknown"` when neither header is present
//! (e.g. direct connections in tests).

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::Request,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use dashmap::DashMap;
use tower::{Layer, Service};
use tracing::warn;

struct Window {
    started_at: Instant,
    count: u32,
}

pub struct FixedWindowRateLimiter {
    window: Duration,
    max_requests: u32,
    windows: DashMap<String, Window>,
}

impl FixedWindowRateLimiter {
    pub fn new(window_ms: u64, max_requests: u32) -> Self {
        Self {
            window: Duration::from_millis(window_ms),
            max_requests,
            windows: DashMap::new(),
        }
    }

    /// Returns `Ok(())` if the request is allowed, or `Err(retry_after)` if
    /// the client's window is exhausted.
    pub fn check(&self, client_key: &str) -> Result<(), Duration> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(client_key.to_string())
            .or_insert_with(|| Window {
                started_at: now,
                count: 0,
            });

        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started_at);
            return Err(self.window.saturating_sub(elapsed));
        }

        entry.count += 1;
        Ok(())
    }
}

fn client_key(req: &Request<Body>) -> String {
    req.headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .or_else(|| {
            req.headers()
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<FixedWindowRateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<FixedWindowRateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    limiter: Arc<FixedWindowRateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let key = client_key(&req);
            match limiter.check(&key) {
                Ok(()) => inner.call(req).await,
                Err(retry_after) => {
                    let retry_secs = retry_after.as_secs().max(1);
                    warn!(client = %key, "rate limit exceeded");
                    Ok((
                        StatusCode::TOO_MANY_REQUESTS,
                        [("Retry-After", retry_secs.to_string())],
                        axum::Json(serde_json::json!({
                            "error": "rate_limit_exceeded",
                            "retry_after": retry_secs,
                        })),
                    )
                        .into_response())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn test_router(limiter: Arc<FixedWindowRateLimiter>) -> Router {
        Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(RateLimitLayer::new(limiter))
    }

    #[tokio::test]
    async fn allows_requests_within_limit() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(60_000, 2));
        let app = test_router(limiter);

        for _ in 0..2 {
            let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
            let resp = app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn rejects_requests_exceeding_limit_within_window() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(60_000, 1));
        let app = test_router(limiter);

        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn includes_retry_after_header() {
        let limiter = Arc::new(FixedWindowRateLimiter::new(60_000, 1));
        let app = test_router(limiter);

        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let _ = app.clone().oneshot(req).await.unwrap();

        let req = Request::builder().uri("/ping").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after = resp.headers().get("retry-after").unwrap();
        assert!(retry_after.to_str().unwrap().parse::<u64>().is_ok());
    }

    #[tokio::test]
    async fn window_resets_after_elapsed_time() {
        let limiter = FixedWindowRateLimiter::new(50, 1);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-a").is_err());
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.check("client-a").is_ok());
    }

    #[tokio::test]
    async fn different_clients_have_separate_windows() {
        let limiter = FixedWindowRateLimiter::new(60_000, 1);
        assert!(limiter.check("client-a").is_ok());
        assert!(limiter.check("client-b").is_ok());
        assert!(limiter.check("client-a").is_err());
    }
}
