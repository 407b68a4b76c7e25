//! HTTP bridge exposing the agent task queue, session store, and
//! statistics over a REST API.
//!
//! Key modules:
//! - [`routes`] — Axum-based REST API
//! - [`state`] — shared application state
//! - [`rate_limit`] — fixed-window per-client rate limiting
//! - [`api_error`] — unified HTTP error mapping

pub mod api_error;
pub mod rate_limit;
pub mod response;
pub mod routes;
pub mod state;
