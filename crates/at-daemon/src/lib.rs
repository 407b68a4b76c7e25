//! Background daemon for the agent task execution service.
//!
//! The daemon owns the HTTP API server, the bounded-concurrency task queue
//! and its scheduler loop, the statistics collector, and the config
//! hot-reload watcher.

pub mod daemon;
