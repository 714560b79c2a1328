//! Health Check API Handler

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::state::AppState;

/// GET /health
/// Liveness probe; also names the pipeline this server drives
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "pipeline": state.pipeline.definition().name,
    }))
}
