use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration, persisted as JSON at `~/.auto-tundra/config.json`
/// (or `<data_dir>/config.json` once `data_dir` has been resolved).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_agent_path")]
    pub agent_path: String,
    #[serde(default = "default_toolchain_bin")]
    pub toolchain_bin: String,
    #[serde(default)]
    pub default_project_path: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    #[serde(default = "default_session_retention_days")]
    pub session_retention_days: u32,
    #[serde(default)]
    pub task_queue: TaskQueueConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_budget_usd")]
    pub max_budget_usd: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub enable_root_compatibility: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            agent_path: default_agent_path(),
            toolchain_bin: default_toolchain_bin(),
            default_project_path: None,
            data_dir: default_data_dir(),
            log_file: default_log_file(),
            pid_file: default_pid_file(),
            session_retention_days: default_session_retention_days(),
            task_queue: TaskQueueConfig::default(),
            rate_limit: RateLimitConfig::default(),
            webhook: WebhookConfig::default(),
            statistics: StatisticsConfig::default(),
            default_model: default_model(),
            max_budget_usd: default_max_budget_usd(),
            log_level: default_log_level(),
            enable_root_compatibility: false,
        }
    }
}

impl Config {
    /// Load config from `~/.auto-tundra/config.json`, falling back to
    /// defaults when the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_or_default(Self::default_path())
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Load from a specific path, or defaults if it doesn't exist yet.
    pub fn load_from_or_default(path: PathBuf) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Serialize config to pretty JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".auto-tundra")
            .join("config.json")
    }

    /// Merge live-reloadable fields from `other` into `self`, leaving
    /// restart-required fields (port, host, data_dir, pid_file) untouched.
    pub fn apply_live_reload(&mut self, other: &Config) {
        self.agent_path = other.agent_path.clone();
        self.toolchain_bin = other.toolchain_bin.clone();
        self.default_project_path = other.default_project_path.clone();
        self.session_retention_days = other.session_retention_days;
        self.task_queue = other.task_queue.clone();
        self.rate_limit = other.rate_limit.clone();
        self.webhook = other.webhook.clone();
        self.statistics = other.statistics.clone();
        self.default_model = other.default_model.clone();
        self.max_budget_usd = other.max_budget_usd;
        self.log_level = other.log_level.clone();
    }
}

/// Whether the current process is running with superuser identity.
///
/// Used at startup to refuse to run as root unless `enable_root_compatibility`
/// is set, matching the agent CLI's own root block.
#[cfg(unix)]
pub fn is_superuser() -> bool {
    // SAFETY: geteuid takes no arguments and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
pub fn is_superuser() -> bool {
    false
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskQueueConfig {
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_queue_timeout_ms")]
    pub default_timeout_ms: u64,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_queue_concurrency(),
            default_timeout_ms: default_queue_timeout_ms(),
        }
    }
}

fn default_queue_concurrency() -> usize {
    4
}
fn default_queue_timeout_ms() -> u64 {
    300_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_rate_max_requests")]
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: default_rate_window_ms(),
            max_requests: default_rate_max_requests(),
        }
    }
}

fn default_rate_window_ms() -> u64 {
    60_000
}
fn default_rate_max_requests() -> u32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub default_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_webhook_retries")]
    pub retries: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_url: None,
            timeout_ms: default_webhook_timeout_ms(),
            retries: default_webhook_retries(),
        }
    }
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}
fn default_webhook_retries() -> u32 {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_stats_interval_secs")]
    pub collection_interval_secs: u64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            collection_interval_secs: default_stats_interval_secs(),
        }
    }
}

fn default_stats_interval_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}
fn default_port() -> u16 {
    9876
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_agent_path() -> String {
    "claude".into()
}
fn default_toolchain_bin() -> String {
    "node".into()
}
fn default_data_dir() -> String {
    "~/.auto-tundra".into()
}
fn default_log_file() -> String {
    "~/.auto-tundra/server.log".into()
}
fn default_pid_file() -> String {
    "~/.auto-tundra/server.pid".into()
}
fn default_session_retention_days() -> u32 {
    30
}
fn default_model() -> String {
    "claude-sonnet-4".into()
}
fn default_max_budget_usd() -> f64 {
    10.0
}
fn default_log_level() -> String {
    "info".into()
}
