//! Process pidfile for single-instance enforcement.
//!
//! When the server starts it writes its pid to the configured pid file
//! (default `server.pid` under the data directory). A fresh start checks
//! whether a previous instance's pid is still alive before binding; a dead
//! instance's pidfile is cleaned up automatically.
//!
//! ## Race safety
//!
//! `acquire()` uses `O_CREAT | O_EXCL` to atomically create the pidfile. If
//! two processes race, exactly one wins the create; the loser checks whether
//! the winner is still alive.
//!
//! ## Stale pidfile recovery
//!
//! A pidfile whose pid is no longer alive (crash, `SIGKILL`) is removed
//! automatically so the next start can proceed.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of trying to acquire the pidfile.
pub enum AcquireResult {
    /// We created the pidfile — we own it.
    Acquired,
    /// Another live process holds the pidfile.
    AlreadyRunning(u32),
    /// A stale pidfile was cleaned up — the caller should retry.
    StaleRemoved,
}

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Try to exclusively create and write the pidfile with the current pid.
    pub fn acquire(&self) -> std::io::Result<AcquireResult> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true) // O_CREAT | O_EXCL
            .open(&self.path)
        {
            Ok(mut file) => {
                let pid = std::process::id();
                file.write_all(pid.to_string().as_bytes())?;
                file.sync_all()?;
                Ok(AcquireResult::Acquired)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => match self.read() {
                Some(existing) if pid_alive(existing) => Ok(AcquireResult::AlreadyRunning(existing)),
                _ => {
                    tracing::info!("removing stale pidfile");
                    self.remove();
                    Ok(AcquireResult::StaleRemoved)
                }
            },
            Err(e) => Err(e),
        }
    }

    /// Acquire with one automatic retry after stale cleanup.
    pub fn acquire_or_fail(&self) -> Result<(), String> {
        for attempt in 0..2 {
            match self.acquire() {
                Ok(AcquireResult::Acquired) => return Ok(()),
                Ok(AcquireResult::AlreadyRunning(pid)) => {
                    return Err(format!("server already running (pid={pid})"));
                }
                Ok(AcquireResult::StaleRemoved) if attempt == 0 => {
                    tracing::info!("stale pidfile removed, retrying acquire");
                    continue;
                }
                Ok(AcquireResult::StaleRemoved) => {
                    return Err("failed to acquire pidfile after stale cleanup".into());
                }
                Err(e) => return Err(format!("pidfile I/O error: {e}")),
            }
        }
        Err("pidfile acquire failed".into())
    }

    pub fn read(&self) -> Option<u32> {
        std::fs::read_to_string(&self.path).ok()?.trim().parse().ok()
    }

    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Check if a process with the given pid is alive.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // SAFETY: kill with signal 0 checks existence without sending a signal.
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // On non-Unix platforms, assume alive (conservative — avoids accidental cleanup).
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path() -> PathBuf {
        std::env::temp_dir().join(format!("at-core-pidfile-test-{}.pid", uuid::Uuid::new_v4()))
    }

    #[test]
    fn current_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
    }

    #[test]
    fn bogus_pid_is_dead() {
        // PID 4_000_000 is extremely unlikely to exist.
        assert!(!pid_alive(4_000_000));
    }

    #[test]
    fn acquire_then_acquire_again_sees_live_holder() {
        let path = tmp_path();
        let a = PidFile::new(&path);
        assert!(matches!(a.acquire().unwrap(), AcquireResult::Acquired));

        let b = PidFile::new(&path);
        match b.acquire().unwrap() {
            AcquireResult::AlreadyRunning(pid) => assert_eq!(pid, std::process::id()),
            _ => panic!("expected AlreadyRunning"),
        }

        a.remove();
    }

    #[test]
    fn stale_pidfile_is_removed_on_acquire() {
        let path = tmp_path();
        std::fs::write(&path, "4000000").unwrap();

        let pf = PidFile::new(&path);
        assert!(matches!(pf.acquire_or_fail(), Ok(())));
        pf.remove();
    }
}
