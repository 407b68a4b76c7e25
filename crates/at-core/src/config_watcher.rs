//! Debounced config file watcher.
//!
//! `FileWatcher` delivers one `FileChangeEvent` per underlying OS
//! notification, which for a single `config.json` save can fire several
//! times in quick succession (editors often write-then-rename, or write in
//! chunks). `ConfigWatcher` coalesces bursts of events on the config path
//! into a single reload signal, waiting `debounce_ms` of quiet time after
//! the last observed change before firing.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::file_watcher::{FileWatcher, FileWatcherConfig};

pub struct ConfigWatcher {
    watcher: FileWatcher,
    config_path: PathBuf,
    debounce: Duration,
    pending_since: Option<Instant>,
}

impl ConfigWatcher {
    pub fn new(config_path: impl Into<PathBuf>, debounce_ms: u64) -> Result<Self, notify::Error> {
        let config_path = config_path.into();
        let watch_dir = config_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher = FileWatcher::new(FileWatcherConfig {
            root_path: watch_dir.clone(),
            ignore_patterns: Vec::new(),
            debounce_ms,
        })?;
        watcher.add_watch(watch_dir.to_string_lossy().as_ref())?;

        Ok(Self {
            watcher,
            config_path,
            debounce: Duration::from_millis(debounce_ms),
            pending_since: None,
        })
    }

    /// Poll for a config change. Returns `true` at most once per debounced
    /// burst of writes to the watched config file. Intended to be called
    /// periodically from a reload loop.
    pub fn poll_reload_ready(&mut self) -> bool {
        let events = self.watcher.recv_events();
        let touched = events
            .iter()
            .any(|e| Path::new(&e.path) == self.config_path);

        if touched {
            self.pending_since = Some(Instant::now());
            return false;
        }

        match self.pending_since {
            Some(since) if since.elapsed() >= self.debounce => {
                self.pending_since = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread;

    #[test]
    fn burst_of_writes_fires_reload_once_after_quiet_period() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, "{}").unwrap();

        let mut watcher = ConfigWatcher::new(&config_path, 100).unwrap();

        for _ in 0..3 {
            fs::write(&config_path, "{\"port\":9000}").unwrap();
            thread::sleep(Duration::from_millis(20));
            assert!(!watcher.poll_reload_ready());
        }

        thread::sleep(Duration::from_millis(150));
        assert!(watcher.poll_reload_ready());
    }

    #[test]
    fn untouched_watcher_never_fires() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, "{}").unwrap();

        let mut watcher = ConfigWatcher::new(&config_path, 50).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(!watcher.poll_reload_ready());
    }
}
