use tracing_subscriber::{reload, EnvFilter, fmt};
use tracing_subscriber::prelude::*;

/// Handle returned by [`init_logging_reloadable`] for changing the active
/// filter at runtime (e.g. from a config hot-reload path) without restarting
/// the process.
pub type LogLevelHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Initialize logging with human-readable output format.
///
/// Uses the `RUST_LOG` environment variable if set, otherwise falls back
/// to `default_level` (e.g. "info", "debug", "at_core=debug,warn").
///
/// Safe to call multiple times (e.g. in tests) -- subsequent calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (human-readable)");
}

/// Initialize logging with JSON output format (suitable for Vector / Loki / ELK).
///
/// Uses the `RUST_LOG` environment variable if set, otherwise falls back
/// to `default_level`.
///
/// Safe to call multiple times -- subsequent calls are no-ops.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init()
        .ok();

    tracing::info!(service = service_name, "logging initialised (json)");
}

/// Initialize logging with a reload handle, so `log_level` can be changed
/// live from a configuration hot-reload path. Returns `None` if a global
/// subscriber is already installed (e.g. a second call in tests).
pub fn init_logging_reloadable(service_name: &str, default_level: &str) -> Option<LogLevelHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let (filter, handle) = reload::Layer::new(filter);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_file(true).with_line_number(true));

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }

    tracing::info!(service = service_name, "logging initialised (reloadable)");
    Some(handle)
}

/// Replace the active log filter, e.g. after a config hot reload.
pub fn set_log_level(handle: &LogLevelHandle, level: &str) {
    if let Err(e) = handle.reload(EnvFilter::new(level)) {
        tracing::warn!(error = %e, level, "failed to apply reloaded log level");
    }
}
