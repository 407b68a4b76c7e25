//! Session store: conversational contexts keyed by UUID, persisted as a
//! single `sessions.json` document.

use std::collections::HashMap;
use std::path::PathBuf;

use at_api_types::{Session, SessionStatus};
use chrono::Utc;
use uuid::Uuid;

use crate::locked_store::{LockedJsonStore, StoreResult};

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct SessionsDoc {
    #[serde(default)]
    sessions: HashMap<Uuid, Session>,
}

pub struct SessionStore {
    inner: LockedJsonStore<SessionsDoc>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: LockedJsonStore::new(path),
        }
    }

    pub fn create(&self, project_path: impl Into<String>, model: impl Into<String>) -> StoreResult<Session> {
        let session = Session::new(project_path, model);
        self.inner.with_lock(|doc| {
            doc.sessions.insert(session.id, session.clone());
        })?;
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> StoreResult<Option<Session>> {
        let doc = self.inner.load()?;
        Ok(doc.sessions.get(&id).cloned())
    }

    /// Apply `f` to the session if present, persisting the mutated record
    /// and bumping `updated_at`. Returns `None` if no session with `id` exists.
    pub fn update(&self, id: Uuid, f: impl FnOnce(&mut Session)) -> StoreResult<Option<Session>> {
        self.inner.with_lock(|doc| {
            if let Some(session) = doc.sessions.get_mut(&id) {
                f(session);
                session.updated_at = Utc::now();
                Some(session.clone())
            } else {
                None
            }
        })
    }

    pub fn delete(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.with_lock(|doc| doc.sessions.remove(&id).is_some())
    }

    pub fn list(&self) -> StoreResult<Vec<Session>> {
        let doc = self.inner.load()?;
        let mut sessions: Vec<Session> = doc.sessions.into_values().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    /// Sessions matching a project path substring, most recent first.
    pub fn search_by_project(&self, query: &str) -> StoreResult<Vec<Session>> {
        let mut sessions = self.list()?;
        sessions.retain(|s| s.project_path.contains(query));
        Ok(sessions)
    }

    /// `list` filtered by status and/or project path, capped at `limit`.
    pub fn list_filtered(
        &self,
        status: Option<SessionStatus>,
        project_path: Option<&str>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Session>> {
        let mut sessions = self.list()?;
        if let Some(status) = status {
            sessions.retain(|s| s.status == status);
        }
        if let Some(project_path) = project_path {
            sessions.retain(|s| s.project_path.contains(project_path));
        }
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Substring search over `id` (as a string) and the `metadata` map's
    /// string-valued entries, most recent first.
    pub fn search(&self, q: &str, limit: Option<usize>) -> StoreResult<Vec<Session>> {
        let mut sessions = self.list()?;
        sessions.retain(|s| {
            s.id.to_string().contains(q)
                || s.metadata.values().any(|v| match v {
                    serde_json::Value::String(s) => s.contains(q),
                    other => other.to_string().contains(q),
                })
        });
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Remove closed/archived sessions whose `updated_at` is older than
    /// `retention_days`. Returns the number removed.
    pub fn cleanup(&self, retention_days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        self.inner.with_lock(|doc| {
            let before = doc.sessions.len();
            doc.sessions.retain(|_, s| {
                s.status == SessionStatus::Active || s.updated_at >= cutoff
            });
            before - doc.sessions.len()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store() -> SessionStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        std::mem::forget(dir);
        SessionStore::new(path)
    }

    #[test]
    fn create_then_get_round_trips() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        let fetched = store.get(session.id).unwrap().unwrap();
        assert_eq!(fetched.project_path, "/tmp/proj");
    }

    #[test]
    fn update_bumps_updated_at_and_persists() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        let before = session.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));
        let updated = store
            .update(session.id, |s| s.total_cost_usd = 1.5)
            .unwrap()
            .unwrap();
        assert_eq!(updated.total_cost_usd, 1.5);
        assert!(updated.updated_at > before);
    }

    #[test]
    fn search_matches_id_and_metadata() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        store
            .update(session.id, |s| {
                s.metadata.insert("tag".into(), "nightly-build".into());
            })
            .unwrap();

        let by_id = store.search(&session.id.to_string()[..8], None).unwrap();
        assert_eq!(by_id.len(), 1);

        let by_metadata = store.search("nightly", None).unwrap();
        assert_eq!(by_metadata.len(), 1);

        assert!(store.search("no-such-substring", None).unwrap().is_empty());
    }

    #[test]
    fn list_filtered_applies_status_and_limit() {
        let store = tmp_store();
        let a = store.create("/tmp/a", "m").unwrap();
        store.create("/tmp/b", "m").unwrap();
        store.update(a.id, |s| s.status = SessionStatus::Closed).unwrap();

        let closed = store.list_filtered(Some(SessionStatus::Closed), None, None).unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].id, a.id);

        let limited = store.list_filtered(None, None, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn delete_removes_session() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        assert!(store.delete(session.id).unwrap());
        assert!(store.get(session.id).unwrap().is_none());
    }

    #[test]
    fn cleanup_keeps_active_sessions_regardless_of_age() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        store
            .update(session.id, |s| {
                s.updated_at = Utc::now() - chrono::Duration::days(400);
            })
            .unwrap();
        let removed = store.cleanup(30).unwrap();
        assert_eq!(removed, 0);
        assert!(store.get(session.id).unwrap().is_some());
    }

    #[test]
    fn cleanup_removes_stale_closed_sessions() {
        let store = tmp_store();
        let session = store.create("/tmp/proj", "claude-sonnet-4").unwrap();
        store
            .update(session.id, |s| {
                s.status = SessionStatus::Closed;
                s.updated_at = Utc::now() - chrono::Duration::days(400);
            })
            .unwrap();
        let removed = store.cleanup(30).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get(session.id).unwrap().is_none());
    }
}
