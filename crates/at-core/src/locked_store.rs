//! Generic file-locked JSON document store.
//!
//! Each store instance owns one JSON document on disk plus a sibling
//! `<file>.lock` marker. A writer creates the lock file exclusively
//! (`O_CREAT | O_EXCL`), performs its read-modify-write, then deletes the
//! lock file it created — verified by a unique per-acquisition token so a
//! process never deletes a lock it doesn't own. Readers that find the lock
//! held poll every 50ms up to a 5s ceiling before giving up with
//! [`StoreError::LockTimeout`].
//!
//! Persistence itself is crash-safe: the document is serialized to a
//! `<file>.tmp` sibling and atomically renamed over the real path, so a
//! process killed mid-write never leaves a corrupt document behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use uuid::Uuid;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("timed out waiting for lock on {0:?}")]
    LockTimeout(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A JSON document guarded by a sibling lock file.
pub struct LockedJsonStore<T> {
    path: PathBuf,
    lock_path: PathBuf,
    _marker: std::marker::PhantomData<T>,
}

impl<T> LockedJsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = Self::lock_path_for(&path);
        Self {
            path,
            lock_path,
            _marker: std::marker::PhantomData,
        }
    }

    fn lock_path_for(path: &Path) -> PathBuf {
        let mut lock = path.as_os_str().to_owned();
        lock.push(".lock");
        PathBuf::from(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, creating a default one in memory if the file
    /// doesn't exist yet. Does not take the lock — for read-only snapshots
    /// where a tiny staleness window is acceptable.
    pub fn load(&self) -> StoreResult<T> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Take the exclusive lock, load the current document, let `f` mutate it,
    /// persist the result, and release the lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> StoreResult<R> {
        let token = self.acquire_lock()?;
        let result = (|| {
            let mut doc = self.load()?;
            let out = f(&mut doc);
            self.persist(&doc)?;
            Ok(out)
        })();
        self.release_lock(&token);
        result
    }

    fn acquire_lock(&self) -> StoreResult<String> {
        let token = Uuid::new_v4().to_string();
        let deadline = std::time::Instant::now() + LOCK_TIMEOUT;
        loop {
            if let Some(parent) = self.lock_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_path)
            {
                Ok(mut file) => {
                    use std::io::Write;
                    file.write_all(token.as_bytes())?;
                    return Ok(token);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if std::time::Instant::now() >= deadline {
                        return Err(StoreError::LockTimeout(self.lock_path.clone()));
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove the lock file only if it still carries the token we wrote —
    /// guards against deleting a lock another process acquired after ours
    /// expired or was force-removed out from under us.
    fn release_lock(&self, token: &str) {
        if let Ok(current) = std::fs::read_to_string(&self.lock_path) {
            if current == token {
                let _ = std::fs::remove_file(&self.lock_path);
            }
        }
    }

    fn persist(&self, doc: &T) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = Self::lock_path_for(&self.path).with_extension("tmp");
        let json = serde_json::to_vec_pretty(doc)?;
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}
