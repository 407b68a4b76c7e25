use axum::{extract::State, Json};

use at_core::config::Config;

use crate::response::Envelope;
use crate::state::ApiState;

pub async fn get_config(State(state): State<ApiState>) -> Json<Envelope<Config>> {
    Envelope::ok(state.config.load().as_ref().clone())
}
