use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use at_agents::queue::TaskQueue;
use at_bridge::routes::build_router;
use at_bridge::state::{expand_home, ApiState};
use at_core::config::Config;
use at_core::config_watcher::ConfigWatcher;
use at_telemetry::logging::LogLevelHandle;
use tracing::{error, info, warn};

use at_harness::shutdown::ShutdownSignal;

/// Configuration for the daemon's background loop intervals. These are
/// distinct from the task queue's own ~1 Hz scheduler tick.
#[derive(Debug, Clone)]
pub struct DaemonIntervals {
    /// How often the statistics collector samples process memory/uptime.
    pub statistics_collection_secs: u64,
    /// How often the config file watcher is polled for a debounced change.
    pub config_poll_ms: u64,
}

impl Default for DaemonIntervals {
    fn default() -> Self {
        Self {
            statistics_collection_secs: 60,
            config_poll_ms: 250,
        }
    }
}

/// The long-running service process: owns the HTTP listener, the task
/// queue's scheduler loop, the statistics collector, and the config
/// hot-reload watcher. Shuts down cooperatively on `ShutdownSignal`.
pub struct Daemon {
    config: Arc<std::sync::RwLock<Config>>,
    state: ApiState,
    queue: Arc<TaskQueue>,
    intervals: DaemonIntervals,
    shutdown: ShutdownSignal,
    log_handle: Option<LogLevelHandle>,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self::with_log_handle(config, None)
    }

    pub fn with_log_handle(config: Config, log_handle: Option<LogLevelHandle>) -> Self {
        let state = ApiState::new(config.clone());
        let queue = state.task_queue.clone();

        Self {
            config: Arc::new(std::sync::RwLock::new(config)),
            state,
            queue,
            intervals: DaemonIntervals::default(),
            shutdown: ShutdownSignal::new(),
            log_handle,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn api_state(&self) -> &ApiState {
        &self.state
    }

    pub fn config(&self) -> Config {
        self.config.read().unwrap().clone()
    }

    /// Run the daemon as a standalone server on a pre-bound listener
    /// (blocking). The caller binds the listener so `main` can report the
    /// resolved port before control passes here.
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        info!("task queue starting");
        self.queue.start(self.shutdown.subscribe());

        self.spawn_statistics_collector();
        self.spawn_config_watcher();

        let router = build_router(self.state.clone());
        let mut shutdown_rx = self.shutdown.subscribe();

        info!(addr = %listener.local_addr()?, "API server listening");
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("HTTP listener closing");
            })
            .await
            .context("API server error")?;

        info!("daemon stopped");
        Ok(())
    }

    fn spawn_statistics_collector(&self) {
        let statistics = self.state.statistics.clone();
        let config = self.config.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let default_interval = self.intervals.statistics_collection_secs;

        tokio::spawn(async move {
            loop {
                let (enabled, interval_secs) = {
                    let cfg = config.read().unwrap();
                    (cfg.statistics.enabled, cfg.statistics.collection_interval_secs)
                };
                let interval_secs = if interval_secs == 0 { default_interval } else { interval_secs };

                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(interval_secs)) => {}
                    _ = shutdown_rx.recv() => {
                        info!("statistics collector stopping");
                        return;
                    }
                }

                if !enabled {
                    continue;
                }

                let memory_kb = sample_resident_memory_kb();
                match statistics.summary() {
                    Ok(summary) => {
                        tracing::debug!(
                            memory_kb,
                            total_requests = summary.requests.total,
                            "statistics sample"
                        );
                    }
                    Err(e) => warn!(error = %e, "failed to read statistics summary"),
                }
            }
        });
    }

    fn spawn_config_watcher(&self) {
        let config_path = expand_home(&self.config.read().unwrap().data_dir).join("config.json");
        let mut watcher = match ConfigWatcher::new(&config_path, 500) {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "failed to start config watcher, hot reload disabled");
                return;
            }
        };

        let config = self.config.clone();
        let live_config = self.state.config.clone();
        let queue = self.queue.clone();
        let log_handle = self.log_handle.clone();
        let poll_ms = self.intervals.config_poll_ms;
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(poll_ms)) => {}
                    _ = shutdown_rx.recv() => {
                        info!("config watcher stopping");
                        return;
                    }
                }

                if !watcher.poll_reload_ready() {
                    continue;
                }

                let incoming = match Config::load_from(&config_path) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "failed to reload config, keeping current values");
                        continue;
                    }
                };

                {
                    let mut current = config.write().unwrap();
                    current.apply_live_reload(&incoming);
                }

                queue.set_concurrency(incoming.task_queue.concurrency);
                queue.set_default_timeout_ms(incoming.task_queue.default_timeout_ms);
                queue
                    .set_webhook_defaults(incoming.webhook.enabled, incoming.webhook.default_url.clone())
                    .await;

                if let Some(handle) = &log_handle {
                    at_telemetry::logging::set_log_level(handle, &incoming.log_level);
                }

                live_config.store(Arc::new(config.read().unwrap().clone()));

                info!("configuration hot-reloaded");
            }
        });
    }
}

/// Sample the process's resident memory in KB, via `/proc/self/statm` on
/// Linux. Falls back to `0` on other platforms.
#[cfg(target_os = "linux")]
fn sample_resident_memory_kb() -> u64 {
    std::fs::read_to_string("/proc/self/statm")
        .ok()
        .and_then(|s| {
            let resident_pages: u64 = s.split_whitespace().nth(1)?.parse().ok()?;
            Some(resident_pages * 4)
        })
        .unwrap_or(0)
}

#[cfg(not(target_os = "linux"))]
fn sample_resident_memory_kb() -> u64 {
    0
}

/// Run startup recovery and superuser checks shared by both main entry and
/// embedded callers, then construct a `Daemon`.
pub fn bootstrap(config: Config) -> Result<Daemon> {
    if at_core::config::is_superuser() && !config.enable_root_compatibility {
        anyhow::bail!(
            "refusing to start as root without enable_root_compatibility=true in config.json"
        );
    }
    Ok(Daemon::new(config))
}
