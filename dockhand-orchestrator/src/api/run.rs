//! Run API Handlers
//!
//! HTTP endpoints for triggering and inspecting pipeline runs.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::{PipelineRun, Trigger};
use dockhand_core::dto::run::{PushEvent, RunSummary, TriggerResponse};
use uuid::Uuid;

use crate::api::error::ApiResult;
use crate::service::run_service;
use crate::state::AppState;

// =============================================================================
// Trigger Endpoints
// =============================================================================

/// POST /api/trigger
/// Source push webhook; answers 202 when a run was started, 200 when ignored
pub async fn trigger(
    State(state): State<AppState>,
    Json(event): Json<PushEvent>,
) -> ApiResult<(StatusCode, Json<TriggerResponse>)> {
    tracing::info!("Push event for {}", event.git_ref);

    let response = run_service::handle_push(&state, &event)?;
    let status = if response.accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(response)))
}

/// POST /api/runs
/// Start a manual run
pub async fn start_run(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<RunSummary>)> {
    tracing::info!("Manual run requested");

    let run = run_service::start_run(&state, Trigger::Manual)?;

    Ok((StatusCode::ACCEPTED, Json(RunSummary::from(&run))))
}

// =============================================================================
// Inspection Endpoints
// =============================================================================

/// GET /api/runs
/// List run summaries, newest first
pub async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    tracing::debug!("Listing runs");

    let runs = run_service::list_runs(&state);
    Json(runs.iter().map(RunSummary::from).collect())
}

/// GET /api/runs/{id}
/// Get a run with its stage results
pub async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRun>> {
    tracing::debug!("Getting run: {}", id);

    Ok(Json(run_service::get_run(&state, id)?))
}

/// GET /api/runs/{id}/logs
/// Get all logs for a run
pub async fn get_run_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<LogEntry>>> {
    tracing::debug!("Getting logs for run: {}", id);

    Ok(Json(run_service::get_run_logs(&state, id)?))
}
