//! Run Service
//!
//! Starts pipeline runs in the background and answers run queries.

use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::{PipelineRun, Trigger};
use dockhand_core::dto::run::{PushEvent, TriggerResponse};
use dockhand_core::error::PipelineError;
use uuid::Uuid;

use crate::state::AppState;

/// Service error type
#[derive(Debug)]
pub enum RunError {
    NotFound(Uuid),
    /// Secrets could not be read from the environment
    Secrets(PipelineError),
}

/// Create a run and execute it in the background
///
/// Secrets are read now, at trigger time, and live only as long as the run.
/// The returned snapshot is `Idle`; the run starts once it holds the run lock.
pub fn start_run(state: &AppState, trigger: Trigger) -> Result<PipelineRun, RunError> {
    let secrets = (state.secrets)().map_err(RunError::Secrets)?;

    let run = state.pipeline.new_run(trigger);
    state.runs.save(&run);
    let snapshot = run.clone();

    tracing::info!("Run {} queued ({})", run.id, run.trigger);

    let pipeline = state.pipeline.clone();
    let runs = state.runs.clone();
    tokio::spawn(async move {
        let finished = pipeline.execute(run, &secrets, &*runs).await;
        tracing::debug!("Run {} finished as {}", finished.id, finished.state);
    });

    Ok(snapshot)
}

/// Handle a source push; only pushes to the configured branch start a run
pub fn handle_push(state: &AppState, event: &PushEvent) -> Result<TriggerResponse, RunError> {
    let wanted = &state.pipeline.definition().branch;

    let Some(branch) = event.branch() else {
        tracing::debug!("Ignoring push of non-branch ref {}", event.git_ref);
        return Ok(ignored(format!("{} is not a branch", event.git_ref)));
    };

    if branch != wanted.as_str() {
        tracing::debug!("Ignoring push to {} (watching {})", branch, wanted);
        return Ok(ignored(format!("branch {} is not {}", branch, wanted)));
    }

    let run = start_run(
        state,
        Trigger::Push {
            branch: branch.to_string(),
        },
    )?;

    Ok(TriggerResponse {
        accepted: true,
        run_id: Some(run.id),
        reason: None,
    })
}

fn ignored(reason: String) -> TriggerResponse {
    TriggerResponse {
        accepted: false,
        run_id: None,
        reason: Some(reason),
    }
}

/// Get a run by ID
pub fn get_run(state: &AppState, id: Uuid) -> Result<PipelineRun, RunError> {
    state.runs.find_by_id(id).ok_or(RunError::NotFound(id))
}

/// List all runs, newest first
pub fn list_runs(state: &AppState) -> Vec<PipelineRun> {
    state.runs.list_all()
}

/// Get all log entries of a run
pub fn get_run_logs(state: &AppState, id: Uuid) -> Result<Vec<LogEntry>, RunError> {
    get_run(state, id)?;
    Ok(state.runs.find_logs(id))
}
