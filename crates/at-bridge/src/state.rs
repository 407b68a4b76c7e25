//! Shared application state threaded through every HTTP handler.

use std::path::PathBuf;
use std::sync::Arc;

use arc_swap::ArcSwap;
use at_agents::executor::AgentExecutor;
use at_agents::queue::TaskQueue;
use at_agents::webhook::WebhookNotifier;
use at_core::config::Config;
use at_core::stores::{SessionStore, StatsStore, TaskStore};
use at_harness::shutdown::ShutdownSignal;

use crate::rate_limit::FixedWindowRateLimiter;

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<ArcSwap<Config>>,
    pub sessions: Arc<SessionStore>,
    pub tasks: Arc<TaskStore>,
    pub statistics: Arc<StatsStore>,
    pub executor: Arc<AgentExecutor>,
    pub webhook: Arc<WebhookNotifier>,
    /// Scheduler shared with the daemon's background dispatch loop — HTTP
    /// handlers and `Daemon::run_with_listener` must operate on the same
    /// instance so submit/cancel/status see each other's effects.
    pub task_queue: Arc<TaskQueue>,
    pub rate_limiter: Arc<FixedWindowRateLimiter>,
    pub shutdown: ShutdownSignal,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ApiState {
    pub fn new(config: Config) -> Self {
        let data_dir = expand_home(&config.data_dir);

        let sessions = Arc::new(SessionStore::new(data_dir.join("sessions.json")));
        let tasks = Arc::new(TaskStore::new(data_dir.join("tasks.json")));
        let statistics = Arc::new(StatsStore::new(data_dir.join("statistics.json")));

        let executor = Arc::new(AgentExecutor::new(
            config.agent_path.clone(),
            config.toolchain_bin.clone(),
        ));
        let webhook = Arc::new(WebhookNotifier::new(
            std::time::Duration::from_millis(config.webhook.timeout_ms),
            config.webhook.retries,
        ));
        let rate_limiter = Arc::new(FixedWindowRateLimiter::new(
            config.rate_limit.window_ms,
            config.rate_limit.max_requests,
        ));

        let task_queue = TaskQueue::new(
            tasks.clone(),
            sessions.clone(),
            executor.clone(),
            webhook.clone(),
            config.task_queue.concurrency,
            config.task_queue.default_timeout_ms,
        );

        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            sessions,
            tasks,
            statistics,
            executor,
            webhook,
            task_queue,
            rate_limiter,
            shutdown: ShutdownSignal::new(),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.config.load().data_dir)
    }
}
