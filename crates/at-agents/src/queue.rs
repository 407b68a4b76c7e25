//! Priority-ordered, bounded-concurrency task queue.
//!
//! A single scheduler loop (spawned by [`TaskQueue::start`]) owns dispatch:
//! it reserves a slot in `active_tasks` synchronously, before any `.await`,
//! so `|active_tasks|` never exceeds `concurrency` even under concurrent
//! enqueues. Each reserved task then runs as its own `tokio::spawn`ed
//! execution racing a per-task timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use at_api_types::{Task, TaskStatus};
use at_core::stores::task_store::TaskStoreError;
use at_core::stores::{SessionStore, TaskStore};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::executor::{AgentExecutor, ExecuteOptions};
use crate::webhook::{WebhookNotifier, WebhookPayload};

/// Lifecycle events the queue broadcasts as tasks move through it.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    TaskCompleted { task_id: Uuid, result: String },
    TaskFailed { task_id: Uuid, error: String },
    TaskCancelled { task_id: Uuid },
}

struct ActiveTask {
    started_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

#[derive(Debug, serde::Serialize)]
pub struct QueueStatus {
    pub running: bool,
    pub concurrency: usize,
    pub active_tasks: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// The task queue's live state. Cheap to clone (everything inside is an
/// `Arc`); hold a single instance per daemon process.
pub struct TaskQueue {
    store: Arc<TaskStore>,
    sessions: Arc<SessionStore>,
    executor: Arc<AgentExecutor>,
    webhook: Arc<WebhookNotifier>,
    running: AtomicBool,
    concurrency: AtomicUsize,
    default_timeout_ms: AtomicU64,
    webhook_enabled: AtomicBool,
    default_webhook_url: Mutex<Option<String>>,
    active_tasks: Arc<Mutex<HashMap<Uuid, ActiveTask>>>,
    kick_tx: mpsc::UnboundedSender<()>,
    kick_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    events: broadcast::Sender<QueueEvent>,
}

impl TaskQueue {
    pub fn new(
        store: Arc<TaskStore>,
        sessions: Arc<SessionStore>,
        executor: Arc<AgentExecutor>,
        webhook: Arc<WebhookNotifier>,
        concurrency: usize,
        default_timeout_ms: u64,
    ) -> Arc<Self> {
        let (kick_tx, kick_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            store,
            sessions,
            executor,
            webhook,
            running: AtomicBool::new(false),
            concurrency: AtomicUsize::new(concurrency.max(1)),
            default_timeout_ms: AtomicU64::new(default_timeout_ms),
            webhook_enabled: AtomicBool::new(false),
            default_webhook_url: Mutex::new(None),
            active_tasks: Arc::new(Mutex::new(HashMap::new())),
            kick_tx,
            kick_rx: Mutex::new(Some(kick_rx)),
            events,
        })
    }

    pub fn task_store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    pub fn set_concurrency(&self, n: usize) {
        self.concurrency.store(n.max(1), Ordering::SeqCst);
    }

    pub fn set_default_timeout_ms(&self, ms: u64) {
        self.default_timeout_ms.store(ms, Ordering::SeqCst);
    }

    pub async fn set_webhook_defaults(&self, enabled: bool, url: Option<String>) {
        self.webhook_enabled.store(enabled, Ordering::SeqCst);
        *self.default_webhook_url.lock().await = url;
    }

    async fn effective_webhook_url(&self, task_override: &Option<String>) -> Option<String> {
        if let Some(url) = task_override {
            return Some(url.clone());
        }
        if self.webhook_enabled.load(Ordering::SeqCst) {
            self.default_webhook_url.lock().await.clone()
        } else {
            None
        }
    }

    fn kick(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Persist a new task as `pending` and wake the scheduler.
    pub fn add_task(&self, task: Task) -> Result<Task, TaskStoreError> {
        let task = self.store.create(task)?;
        self.kick();
        Ok(task)
    }

    pub fn get(&self, id: Uuid) -> Result<Option<Task>, TaskStoreError> {
        self.store.get(id).map_err(TaskStoreError::Store)
    }

    pub fn list(&self) -> Result<Vec<Task>, TaskStoreError> {
        self.store.list().map_err(TaskStoreError::Store)
    }

    pub fn list_filtered(&self, status: Option<TaskStatus>, limit: Option<usize>) -> Result<Vec<Task>, TaskStoreError> {
        self.store.list_filtered(status, limit).map_err(TaskStoreError::Store)
    }

    /// Cancel a task. Evicts it from `active_tasks` (aborting the in-flight
    /// execution, which kills the child process via `kill_on_drop`) if it was
    /// running, then marks it `cancelled` in the store.
    pub async fn cancel(&self, id: Uuid) -> Result<Option<Task>, TaskStoreError> {
        if let Some(entry) = self.active_tasks.lock().await.remove(&id) {
            entry.handle.abort();
        }

        match self.store.cancel(id) {
            Ok(task) => {
                let _ = self.events.send(QueueEvent::TaskCancelled { task_id: id });
                self.notify_webhook(WebhookPayload::task_cancelled(id), &None).await;
                Ok(Some(task))
            }
            Err(TaskStoreError::IllegalTransition { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Change a task's dispatch priority. Only legal while the task is still
    /// `pending` or `processing`; a reserved/terminal task's priority is
    /// frozen (see the queue's ordering guarantees).
    pub fn set_priority(&self, id: Uuid, priority: u8) -> Result<Task, TaskStoreError> {
        self.store.set_priority(id, priority)
    }

    pub async fn status(&self) -> QueueStatus {
        let counts = self.store.status_counts().unwrap_or_default();
        let active = self.active_tasks.lock().await.len();
        QueueStatus {
            running: self.running.load(Ordering::SeqCst),
            concurrency: self.concurrency.load(Ordering::SeqCst),
            active_tasks: active,
            pending: counts.get(&TaskStatus::Pending).copied().unwrap_or(0),
            processing: counts.get(&TaskStatus::Processing).copied().unwrap_or(0),
            completed: counts.get(&TaskStatus::Completed).copied().unwrap_or(0),
            failed: counts.get(&TaskStatus::Failed).copied().unwrap_or(0),
            cancelled: counts.get(&TaskStatus::Cancelled).copied().unwrap_or(0),
        }
    }

    /// Reset any task left in `processing` by a previous, uncleanly stopped
    /// run back to `pending` so it gets picked up again.
    fn recover(&self) {
        match self.store.requeue_stuck() {
            Ok(ids) if !ids.is_empty() => {
                info!(count = ids.len(), "requeued tasks orphaned by a previous run");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to scan task store for recovery"),
        }
    }

    /// Start the scheduler loop. Consumes the kick channel, so this may only
    /// be called once per `TaskQueue`. Runs until `shutdown` fires, at which
    /// point it stops polling for new work but leaves already-dispatched
    /// executions to finish (the caller should await drain separately).
    pub fn start(self: &Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let queue = self.clone();
        let mut kick_rx = match queue.kick_rx.try_lock().ok().and_then(|mut g| g.take()) {
            Some(rx) => rx,
            None => {
                warn!("task queue scheduler already started, ignoring duplicate start()");
                return;
            }
        };

        queue.recover();
        queue.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            queue.kick();

            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    got = kick_rx.recv() => {
                        if got.is_none() {
                            break;
                        }
                    }
                    _ = shutdown.recv() => {
                        queue.running.store(false, Ordering::SeqCst);
                        break;
                    }
                }

                if queue.running.load(Ordering::SeqCst) {
                    queue.dispatch_ready().await;
                }
            }
        });
    }

    /// Reserve and dispatch as many pending tasks as the concurrency cap
    /// allows. The reservation (inserting into `active_tasks`) happens
    /// synchronously inside the lock held across the store lookup, so two
    /// ticks can never both claim the same task.
    async fn dispatch_ready(self: &Arc<Self>) {
        loop {
            let concurrency = self.concurrency.load(Ordering::SeqCst);

            // Reserve a slot (if one is free) inside a single lock scope, so
            // the pending lookup and the `active_tasks` insert are atomic
            // with respect to other scheduler ticks.
            let task = {
                let mut active = self.active_tasks.lock().await;
                if active.len() >= concurrency {
                    return;
                }
                let pending = match self.store.pending_in_dispatch_order() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = %e, "failed to list pending tasks");
                        return;
                    }
                };
                let Some(next) = pending.into_iter().find(|t| !active.contains_key(&t.id)) else {
                    return;
                };
                active.insert(
                    next.id,
                    ActiveTask {
                        started_at: Utc::now(),
                        handle: tokio::spawn(async {}),
                    },
                );
                next
            };

            if let Err(e) = self.store.mark_processing(task.id) {
                self.active_tasks.lock().await.remove(&task.id);
                error!(task_id = %task.id, error = %e, "failed to mark task processing, evicting reservation");
                continue;
            }

            let queue = self.clone();
            let task_id = task.id;
            let handle = tokio::spawn(async move {
                queue.run_one(task).await;
            });

            if let Some(entry) = self.active_tasks.lock().await.get_mut(&task_id) {
                entry.handle = handle;
            }
        }
    }

    /// Execute a single reserved task, racing it against the configured
    /// per-task timeout, then persist the terminal state and notify.
    async fn run_one(self: Arc<Self>, task: Task) {
        let timeout_ms = self.default_timeout_ms.load(Ordering::SeqCst);
        let started = std::time::Instant::now();

        let session = match task.metadata.session_id {
            Some(id) => self.sessions.get(id).ok().flatten(),
            None => None,
        };

        let opts = ExecuteOptions {
            prompt: task.prompt.clone(),
            project_path: task.project_path.clone(),
            model: task.model.clone(),
            system_prompt: task.metadata.system_prompt.clone(),
            max_budget_usd: task.metadata.max_budget_usd,
            allowed_tools: task.metadata.allowed_tools.clone(),
            disallowed_tools: task.metadata.disallowed_tools.clone(),
            agent: task.metadata.agent.clone(),
            mcp_config: task.metadata.mcp_config.clone(),
            session_id: task.metadata.session_id,
        };

        let outcome = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.executor.execute(&opts, session.as_ref()),
        )
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(result)) => {
                match self.store.mark_completed(task.id, result.result.clone(), result.cost_usd, duration_ms) {
                    Ok(_) => {
                        if !result.budget_exceeded {
                            if let Some(session_id) = task.metadata.session_id {
                                let _ = self.sessions.update(session_id, |s| {
                                    s.total_cost_usd += result.cost_usd;
                                    s.messages_count += 1;
                                });
                            }
                        }
                        let _ = self.events.send(QueueEvent::TaskCompleted {
                            task_id: task.id,
                            result: result.result.clone(),
                        });
                        self.notify_webhook(
                            WebhookPayload::task_completed(task.id, &result.result, result.cost_usd, duration_ms),
                            &task.metadata.webhook_url,
                        )
                        .await;
                    }
                    Err(e) => error!(task_id = %task.id, error = %e, "failed to persist completed task"),
                }
            }
            Ok(Err(e)) => {
                let error_text = e.to_string();
                match self.store.mark_failed(task.id, error_text.clone(), Some(duration_ms)) {
                    Ok(_) => {
                        let _ = self.events.send(QueueEvent::TaskFailed {
                            task_id: task.id,
                            error: error_text.clone(),
                        });
                        self.notify_webhook(
                            WebhookPayload::task_failed(task.id, &error_text, Some(duration_ms)),
                            &task.metadata.webhook_url,
                        )
                        .await;
                    }
                    Err(e) => error!(task_id = %task.id, error = %e, "failed to persist failed task"),
                }
            }
            Err(_) => {
                let error_text = "Task execution timeout".to_string();
                match self.store.mark_failed(task.id, error_text.clone(), Some(duration_ms)) {
                    Ok(_) => {
                        let _ = self.events.send(QueueEvent::TaskFailed {
                            task_id: task.id,
                            error: error_text.clone(),
                        });
                        self.notify_webhook(
                            WebhookPayload::task_timeout(task.id, &error_text, Some(duration_ms)),
                            &task.metadata.webhook_url,
                        )
                        .await;
                    }
                    Err(e) => error!(task_id = %task.id, error = %e, "failed to persist timed-out task"),
                }
            }
        }

        self.active_tasks.lock().await.remove(&task.id);
        self.kick();
    }

    async fn notify_webhook(&self, payload: WebhookPayload, task_override: &Option<String>) {
        let Some(url) = self.effective_webhook_url(task_override).await else {
            return;
        };
        let webhook = self.webhook.clone();
        tokio::spawn(async move {
            webhook.notify(&url, payload).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AgentSpawner, CommandOutput};
    use crate::webhook::WebhookError;

    struct SlowSpawner {
        delay: Duration,
        response: String,
    }

    #[async_trait::async_trait]
    impl AgentSpawner for SlowSpawner {
        async fn run(
            &self,
            _program: &str,
            _args: &[String],
            _env: &[(String, String)],
            _cwd: &str,
            _timeout: Duration,
        ) -> crate::executor::Result<CommandOutput> {
            tokio::time::sleep(self.delay).await;
            Ok(CommandOutput {
                stdout: self.response.clone().into_bytes(),
                stderr: Vec::new(),
                exit_code: 0,
            })
        }
    }

    struct NoopSender;

    #[async_trait::async_trait]
    impl crate::webhook::WebhookSender for NoopSender {
        async fn send(&self, _url: &str, _payload: &WebhookPayload) -> Result<(), WebhookError> {
            Ok(())
        }
    }

    fn tmp_store() -> Arc<TaskStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::mem::forget(dir);
        Arc::new(TaskStore::new(path))
    }

    fn tmp_sessions() -> Arc<SessionStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::mem::forget(dir);
        Arc::new(SessionStore::new(path))
    }

    fn queue_with(delay: Duration, concurrency: usize, timeout_ms: u64) -> Arc<TaskQueue> {
        let spawner = std::sync::Arc::new(SlowSpawner {
            delay,
            response: r#"{"result":"ok","total_cost_usd":0.01}"#.into(),
        });
        let executor = Arc::new(AgentExecutor::with_spawner(spawner, "claude", "node"));
        let webhook = Arc::new(WebhookNotifier::with_sender(std::sync::Arc::new(NoopSender), 0));
        TaskQueue::new(tmp_store(), tmp_sessions(), executor, webhook, concurrency, timeout_ms)
    }

    #[tokio::test]
    async fn dispatch_respects_concurrency_cap() {
        let queue = queue_with(Duration::from_millis(100), 1, 5_000);
        queue.add_task(Task::new("a", "/tmp", "m")).unwrap();
        queue.add_task(Task::new("b", "/tmp", "m")).unwrap();

        queue.dispatch_ready().await;
        assert_eq!(queue.active_tasks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn completed_task_persists_and_frees_slot() {
        let queue = queue_with(Duration::from_millis(10), 2, 5_000);
        let task = queue.add_task(Task::new("a", "/tmp", "m")).unwrap();
        queue.dispatch_ready().await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let stored = queue.store.get(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(queue.active_tasks.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn timeout_marks_task_failed() {
        let queue = queue_with(Duration::from_millis(500), 1, 30);
        let task = queue.add_task(Task::new("a", "/tmp", "m")).unwrap();
        queue.dispatch_ready().await;

        tokio::time::sleep(Duration::from_millis(200)).await;

        let stored = queue.store.get(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert!(stored.error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn cancel_pending_task_never_runs() {
        let queue = queue_with(Duration::from_millis(50), 0, 5_000);
        let task = queue.add_task(Task::new("a", "/tmp", "m")).unwrap();

        let cancelled = queue.cancel(task.id).await.unwrap();
        assert!(cancelled.is_some());
        let stored = queue.store.get(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn completed_task_does_not_attribute_cost_when_budget_exceeded() {
        let spawner = std::sync::Arc::new(SlowSpawner {
            delay: Duration::from_millis(5),
            response: r#"{"result":"ok","total_cost_usd":0.2}"#.into(),
        });
        let executor = Arc::new(AgentExecutor::with_spawner(spawner, "claude", "node"));
        let webhook = Arc::new(WebhookNotifier::with_sender(std::sync::Arc::new(NoopSender), 0));
        let sessions = tmp_sessions();
        let session = sessions.create("/tmp", "m").unwrap();
        sessions.update(session.id, |s| s.total_cost_usd = 0.9).unwrap();

        let queue = TaskQueue::new(tmp_store(), sessions.clone(), executor, webhook, 1, 5_000);
        let mut task = Task::new("a", "/tmp", "m");
        task.metadata.session_id = Some(session.id);
        task.metadata.max_budget_usd = Some(1.0);
        queue.add_task(task.clone()).unwrap();
        queue.dispatch_ready().await;

        tokio::time::sleep(Duration::from_millis(100)).await;

        let stored = queue.store.get(task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let unchanged = sessions.get(session.id).unwrap().unwrap();
        assert_eq!(unchanged.total_cost_usd, 0.9);
    }

    #[tokio::test]
    async fn recover_resets_stuck_processing_tasks() {
        let store = tmp_store();
        let task = Task::new("a", "/tmp", "m");
        store.create(task.clone()).unwrap();
        store.mark_processing(task.id).unwrap();

        let executor = Arc::new(AgentExecutor::with_spawner(
            std::sync::Arc::new(SlowSpawner {
                delay: Duration::from_millis(1),
                response: "{}".into(),
            }),
            "claude",
            "node",
        ));
        let webhook = Arc::new(WebhookNotifier::with_sender(std::sync::Arc::new(NoopSender), 0));
        let queue = TaskQueue::new(store.clone(), tmp_sessions(), executor, webhook, 1, 5_000);
        queue.recover();

        assert_eq!(store.get(task.id).unwrap().unwrap().status, TaskStatus::Pending);
    }
}
