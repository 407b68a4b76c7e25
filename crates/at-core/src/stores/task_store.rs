//! Task store: durable queue records persisted as a single `tasks.json`
//! document, with helpers for the dispatch lifecycle
//! (`pending -> processing -> completed|failed|cancelled`).

use std::collections::HashMap;
use std::path::PathBuf;

use at_api_types::{Task, TaskStatus};
use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::locked_store::{LockedJsonStore, StoreError, StoreResult};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct TasksDoc {
    #[serde(default)]
    tasks: HashMap<Uuid, Task>,
}

#[derive(Debug, Error)]
pub enum TaskStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("task {0} not found")]
    NotFound(Uuid),
    #[error("illegal transition from {from:?} to {to:?} for task {id}")]
    IllegalTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
}

pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

pub struct TaskStore {
    inner: LockedJsonStore<TasksDoc>,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: LockedJsonStore::new(path),
        }
    }

    pub fn create(&self, task: Task) -> StoreResult<Task> {
        self.inner.with_lock(|doc| {
            doc.tasks.insert(task.id, task.clone());
        })?;
        Ok(task)
    }

    pub fn get(&self, id: Uuid) -> StoreResult<Option<Task>> {
        let doc = self.inner.load()?;
        Ok(doc.tasks.get(&id).cloned())
    }

    pub fn list(&self) -> StoreResult<Vec<Task>> {
        let doc = self.inner.load()?;
        let mut tasks: Vec<Task> = doc.tasks.into_values().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// `list` filtered by status and capped at `limit`, most recent first.
    pub fn list_filtered(&self, status: Option<TaskStatus>, limit: Option<usize>) -> StoreResult<Vec<Task>> {
        let mut tasks = self.list()?;
        if let Some(status) = status {
            tasks.retain(|t| t.status == status);
        }
        if let Some(limit) = limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    /// All tasks currently `Pending`, in dispatch order (priority desc, then
    /// FIFO within priority).
    pub fn pending_in_dispatch_order(&self) -> StoreResult<Vec<Task>> {
        let doc = self.inner.load()?;
        let mut pending: Vec<Task> = doc
            .tasks
            .into_values()
            .filter(|t| t.status == TaskStatus::Pending)
            .collect();
        pending.sort_by_key(|t| t.dispatch_key());
        Ok(pending)
    }

    fn transition(&self, id: Uuid, to: TaskStatus, f: impl FnOnce(&mut Task)) -> TaskStoreResult<Task> {
        let result = self.inner.with_lock(|doc| -> Result<Task, TaskStoreError> {
            let task = doc.tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
            if !task.status.can_transition_to(&to) {
                return Err(TaskStoreError::IllegalTransition {
                    id,
                    from: task.status,
                    to,
                });
            }
            task.status = to;
            task.updated_at = Utc::now();
            f(task);
            Ok(task.clone())
        })?;
        result
    }

    pub fn mark_processing(&self, id: Uuid) -> TaskStoreResult<Task> {
        self.transition(id, TaskStatus::Processing, |t| {
            t.started_at = Some(Utc::now());
        })
    }

    pub fn mark_completed(&self, id: Uuid, result_text: String, cost_usd: f64, duration_ms: u64) -> TaskStoreResult<Task> {
        self.transition(id, TaskStatus::Completed, |t| {
            t.result = Some(result_text);
            t.cost_usd = cost_usd;
            t.duration_ms = Some(duration_ms);
            t.completed_at = Some(Utc::now());
        })
    }

    pub fn mark_failed(&self, id: Uuid, error: String, duration_ms: Option<u64>) -> TaskStoreResult<Task> {
        self.transition(id, TaskStatus::Failed, |t| {
            t.error = Some(error);
            t.duration_ms = duration_ms;
            t.completed_at = Some(Utc::now());
        })
    }

    pub fn cancel(&self, id: Uuid) -> TaskStoreResult<Task> {
        self.transition(id, TaskStatus::Cancelled, |t| {
            t.completed_at = Some(Utc::now());
        })
    }

    /// Update a task's dispatch priority. Allowed only while the task is
    /// still `pending` or `processing` — a queued-or-running task can be
    /// reprioritized, but a terminal one is frozen.
    pub fn set_priority(&self, id: Uuid, priority: u8) -> TaskStoreResult<Task> {
        self.inner.with_lock(|doc| -> Result<Task, TaskStoreError> {
            let task = doc.tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
            if task.status.is_terminal() {
                return Err(TaskStoreError::IllegalTransition {
                    id,
                    from: task.status,
                    to: task.status,
                });
            }
            task.priority = priority;
            task.updated_at = Utc::now();
            Ok(task.clone())
        })?
    }

    pub fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.with_lock(|doc| doc.tasks.remove(&id).is_some())
    }

    /// Counts of tasks in each status, for the queue status endpoint.
    pub fn status_counts(&self) -> StoreResult<HashMap<TaskStatus, usize>> {
        let doc = self.inner.load()?;
        let mut counts = HashMap::new();
        for task in doc.tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Reset any task stuck in `Processing` back to `Pending`.
    ///
    /// Used at queue startup to recover tasks that were mid-execution when
    /// the process last stopped. `started_at` is left untouched; it becomes
    /// informational rather than authoritative once a task is reset this way.
    pub fn requeue_stuck(&self) -> StoreResult<Vec<Uuid>> {
        self.inner.with_lock(|doc| {
            let mut requeued = Vec::new();
            for task in doc.tasks.values_mut() {
                if task.status == TaskStatus::Processing {
                    task.status = TaskStatus::Pending;
                    task.updated_at = Utc::now();
                    requeued.push(task.id);
                }
            }
            requeued
        })
    }

    /// Remove terminal tasks older than `retention_days`.
    pub fn cleanup(&self, retention_days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        self.inner.with_lock(|doc| {
            let before = doc.tasks.len();
            doc.tasks
                .retain(|_, t| !t.status.is_terminal() || t.updated_at >= cutoff);
            before - doc.tasks.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store() -> TaskStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::mem::forget(dir);
        TaskStore::new(path)
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = tmp_store();
        let task = Task::new("do the thing", "/tmp/proj", "claude-sonnet-4");
        store.create(task.clone()).unwrap();
        let fetched = store.get(task.id).unwrap().unwrap();
        assert_eq!(fetched.prompt, "do the thing");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[test]
    fn pending_dispatch_order_is_priority_then_fifo() {
        let store = tmp_store();
        let mut low = Task::new("low", "/tmp", "m");
        low.priority = 1;
        let mut high = Task::new("high", "/tmp", "m");
        high.priority = 9;
        let mut high2 = Task::new("high2", "/tmp", "m");
        high2.priority = 9;
        high2.created_at = high.created_at + chrono::Duration::seconds(1);

        store.create(low.clone()).unwrap();
        store.create(high2.clone()).unwrap();
        store.create(high.clone()).unwrap();

        let ordered = store.pending_in_dispatch_order().unwrap();
        assert_eq!(ordered[0].id, high.id);
        assert_eq!(ordered[1].id, high2.id);
        assert_eq!(ordered[2].id, low.id);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let store = tmp_store();
        let task = Task::new("x", "/tmp", "m");
        store.create(task.clone()).unwrap();
        let err = store.mark_completed(task.id, "done".into(), 0.0, 1).unwrap_err();
        assert!(matches!(err, TaskStoreError::IllegalTransition { .. }));
    }

    #[test]
    fn full_lifecycle_pending_to_completed() {
        let store = tmp_store();
        let task = Task::new("x", "/tmp", "m");
        store.create(task.clone()).unwrap();
        store.mark_processing(task.id).unwrap();
        let done = store
            .mark_completed(task.id, "result".into(), 0.02, 1500)
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(done.result.as_deref(), Some("result"));
    }

    #[test]
    fn set_priority_rejected_once_terminal() {
        let store = tmp_store();
        let task = Task::new("x", "/tmp", "m");
        store.create(task.clone()).unwrap();
        store.mark_processing(task.id).unwrap();
        store.mark_completed(task.id, "done".into(), 0.0, 1).unwrap();

        let err = store.set_priority(task.id, 9).unwrap_err();
        assert!(matches!(err, TaskStoreError::IllegalTransition { .. }));
    }

    #[test]
    fn set_priority_allowed_while_pending() {
        let store = tmp_store();
        let task = Task::new("x", "/tmp", "m");
        store.create(task.clone()).unwrap();
        let updated = store.set_priority(task.id, 9).unwrap();
        assert_eq!(updated.priority, 9);
    }

    #[test]
    fn requeue_stuck_resets_processing_to_pending() {
        let store = tmp_store();
        let task = Task::new("x", "/tmp", "m");
        store.create(task.clone()).unwrap();
        store.mark_processing(task.id).unwrap();

        let requeued = store.requeue_stuck().unwrap();
        assert_eq!(requeued, vec![task.id]);
        assert_eq!(store.get(task.id).unwrap().unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn cleanup_keeps_pending_tasks_regardless_of_age() {
        let store = tmp_store();
        let mut task = Task::new("x", "/tmp", "m");
        task.updated_at = Utc::now() - chrono::Duration::days(400);
        store.create(task.clone()).unwrap();
        let removed = store.cleanup(30).unwrap();
        assert_eq!(removed, 0);
    }
}
