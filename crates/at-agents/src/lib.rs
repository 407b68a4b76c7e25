//! Agent execution for the task queue.
//!
//! This crate provides the agent layer that spawns the configured agent CLI
//! against a task prompt and notifies downstream webhooks of the outcome.

pub mod executor;
pub mod queue;
pub mod webhook;
