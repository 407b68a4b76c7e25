//! Response envelope: every `/api/*` and `/health` body carries a top-level
//! `success` flag alongside its payload, per the external HTTP contract.
//! Error bodies carry their own `success:false` shape (see [`crate::api_error::ApiError`]).

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    /// Wrap `data` as a successful response body.
    pub fn ok(data: T) -> Json<Self> {
        Json(Self { success: true, data })
    }
}
