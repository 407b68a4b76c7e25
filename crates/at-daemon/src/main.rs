//! Service entry point: loads configuration, acquires the pid file, binds
//! the HTTP listener, and runs the daemon until a shutdown signal arrives.

use anyhow::{Context, Result};
use at_core::config::Config;
use at_core::pidfile::PidFile;
use tracing::info;

mod daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_or_init_config().context("failed to load configuration")?;

    let log_handle = at_telemetry::logging::init_logging_reloadable("at-daemon", &config.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "auto-tundra daemon starting");

    if at_core::config::is_superuser() && !config.enable_root_compatibility {
        eprintln!(
            "refusing to start as root; set \"enableRootCompatibility\": true in config.json to override"
        );
        std::process::exit(1);
    }

    let data_dir = at_bridge::state::expand_home(&config.data_dir);
    std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;

    let pid_file = PidFile::new(at_bridge::state::expand_home(&config.pid_file));
    match pid_file.acquire_or_fail() {
        Ok(()) => info!(path = %pid_file.path().display(), "pid file acquired"),
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    }

    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            pid_file.remove();
            return Err(e).with_context(|| format!("failed to bind {bind_addr}"));
        }
    };
    info!(%bind_addr, "API listener bound");

    let daemon = daemon::Daemon::with_log_handle(config, log_handle);
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => info!("ctrl-c received"),
            _ = term.recv() => info!("SIGTERM received"),
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("ctrl-c received");
        }

        info!("initiating graceful shutdown");
        shutdown.trigger();
    });

    let result = daemon.run_with_listener(listener).await;

    pid_file.remove();
    result
}

fn load_or_init_config() -> Result<Config> {
    let path = Config::default_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let config = Config::load_from_or_default(path.clone())?;
    if !path.exists() {
        std::fs::write(&path, config.to_json()?).ok();
    }
    Ok(config)
}
