//! Core library for auto-tundra — provides the persisted-document stores,
//! configuration, and file system primitives shared by the daemon and
//! bridge services.
//!
//! - Configuration loading and hot-reload support
//! - Locked JSON document storage (sessions, tasks, statistics)
//! - Process pidfile management
//! - File watching and change detection

pub mod config;
pub mod config_watcher;
pub mod file_watcher;
pub mod locked_store;
pub mod pidfile;
pub mod stores;
