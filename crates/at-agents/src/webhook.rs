//! Webhook notifier: posts task completion/failure events to a configured
//! URL with exponential backoff retries.
//!
//! Backoff follows `min(1000 * 2^(n-1), 10000)` ms between attempts, capped
//! at the configured retry count. A delivery that exhausts all retries is
//! logged and dropped — the task's terminal state is already durable in the
//! task store, so a lost webhook never loses data, only a notification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Identifies this service to webhook receivers, per the wire format's
/// `User-Agent: <service>/1.0` header.
const USER_AGENT: &str = "auto-tundra/1.0";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("request error: {0}")]
    Request(String),
    #[error("server responded with status {0}")]
    BadStatus(u16),
}

pub type Result<T> = std::result::Result<T, WebhookError>;

/// Wire payload delivered to the configured webhook URL: `{event, timestamp, data}`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl WebhookPayload {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn task_completed(task_id: Uuid, result: &str, cost_usd: f64, duration_ms: u64) -> Self {
        Self::new(
            "task.completed",
            json!({ "task_id": task_id, "result": result, "cost_usd": cost_usd, "duration_ms": duration_ms }),
        )
    }

    pub fn task_failed(task_id: Uuid, error: &str, duration_ms: Option<u64>) -> Self {
        Self::new(
            "task.failed",
            json!({ "task_id": task_id, "error": error, "duration_ms": duration_ms }),
        )
    }

    pub fn task_timeout(task_id: Uuid, error: &str, duration_ms: Option<u64>) -> Self {
        Self::new(
            "task.timeout",
            json!({ "task_id": task_id, "error": error, "duration_ms": duration_ms }),
        )
    }

    pub fn task_cancelled(task_id: Uuid) -> Self {
        Self::new("task.cancelled", json!({ "task_id": task_id }))
    }

    pub fn session_created(session_id: Uuid, project_path: &str) -> Self {
        Self::new(
            "session.created",
            json!({ "session_id": session_id, "project_path": project_path }),
        )
    }

    pub fn session_deleted(session_id: Uuid) -> Self {
        Self::new("session.deleted", json!({ "session_id": session_id }))
    }
}

fn backoff_for_attempt(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1u64 << attempt.saturating_sub(1).min(62));
    Duration::from_millis(ms.min(10_000))
}

/// Abstraction over HTTP delivery so the retry loop can be tested without a
/// real network call.
#[async_trait::async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<()>;
}

pub struct ReqwestSender {
    client: Client,
    timeout: Duration,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }
}

#[async_trait::async_trait]
impl WebhookSender for ReqwestSender {
    async fn send(&self, url: &str, payload: &WebhookPayload) -> Result<()> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header("User-Agent", USER_AGENT)
            .json(payload)
            .send()
            .await
            .map_err(|e| WebhookError::Request(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(WebhookError::BadStatus(response.status().as_u16()))
        }
    }
}

pub struct WebhookNotifier {
    sender: std::sync::Arc<dyn WebhookSender>,
    max_retries: u32,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            sender: std::sync::Arc::new(ReqwestSender::new(timeout)),
            max_retries,
        }
    }

    pub fn with_sender(sender: std::sync::Arc<dyn WebhookSender>, max_retries: u32) -> Self {
        Self { sender, max_retries }
    }

    /// Deliver `payload` to `url`, retrying with exponential backoff up to
    /// `max_retries` additional attempts after the first.
    pub async fn notify(&self, url: &str, payload: WebhookPayload) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.sender.send(url, &payload).await {
                Ok(()) => {
                    info!(event = %payload.event, attempt, "webhook delivered");
                    return;
                }
                Err(e) if attempt > self.max_retries => {
                    warn!(
                        event = %payload.event,
                        attempt,
                        error = %e,
                        "webhook delivery exhausted retries, dropping"
                    );
                    return;
                }
                Err(e) => {
                    let backoff = backoff_for_attempt(attempt);
                    warn!(
                        event = %payload.event,
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "webhook delivery failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_payload() -> WebhookPayload {
        WebhookPayload::task_completed(Uuid::new_v4(), "done", 0.01, 500)
    }

    struct AlwaysFail;

    #[async_trait::async_trait]
    impl WebhookSender for AlwaysFail {
        async fn send(&self, _url: &str, _payload: &WebhookPayload) -> Result<()> {
            Err(WebhookError::BadStatus(500))
        }
    }

    struct FailNTimes {
        remaining: AtomicU32,
    }

    #[async_trait::async_trait]
    impl WebhookSender for FailNTimes {
        async fn send(&self, _url: &str, _payload: &WebhookPayload) -> Result<()> {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(WebhookError::BadStatus(503))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn backoff_doubles_and_caps_at_ten_seconds() {
        assert_eq!(backoff_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(backoff_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(backoff_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(backoff_for_attempt(10), Duration::from_millis(10_000));
    }

    #[tokio::test]
    async fn notify_gives_up_after_max_retries() {
        let notifier = WebhookNotifier::with_sender(std::sync::Arc::new(AlwaysFail), 1);
        // With max_retries=1 and always-fail, this resolves after two attempts.
        notifier.notify("http://example.invalid", sample_payload()).await;
    }

    #[tokio::test]
    async fn notify_succeeds_after_transient_failures() {
        let sender = std::sync::Arc::new(FailNTimes {
            remaining: AtomicU32::new(2),
        });
        let notifier = WebhookNotifier::with_sender(sender, 5);
        notifier.notify("http://example.invalid", sample_payload()).await;
    }
}
