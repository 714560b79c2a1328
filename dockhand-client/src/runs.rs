//! Run-related API endpoints

use crate::DockhandClient;
use crate::error::Result;
use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::PipelineRun;
use dockhand_core::dto::run::{PushEvent, RunSummary, TriggerResponse};
use uuid::Uuid;

impl DockhandClient {
    // =============================================================================
    // Triggers
    // =============================================================================

    /// Start a manual run
    ///
    /// # Returns
    /// Summary of the queued run
    pub async fn trigger_run(&self) -> Result<RunSummary> {
        let url = format!("{}/api/runs", self.base_url);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }

    /// Deliver a push event, as a source host webhook would
    ///
    /// # Arguments
    /// * `branch` - Branch that was pushed
    ///
    /// # Returns
    /// Whether a run was started, and its id
    pub async fn push(&self, branch: &str) -> Result<TriggerResponse> {
        let url = format!("{}/api/trigger", self.base_url);
        let event = PushEvent {
            git_ref: format!("refs/heads/{}", branch),
        };
        let response = self.client.post(&url).json(&event).send().await?;

        self.handle_response(response).await
    }

    // =============================================================================
    // Inspection
    // =============================================================================

    /// List run summaries, newest first
    pub async fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let url = format!("{}/api/runs", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get a run by ID
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    ///
    /// # Returns
    /// The run with its stage results
    pub async fn get_run(&self, run_id: Uuid) -> Result<PipelineRun> {
        let url = format!("{}/api/runs/{}", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Get logs for a run
    ///
    /// # Arguments
    /// * `run_id` - The run UUID
    ///
    /// # Returns
    /// All log entries of the run, oldest first
    pub async fn get_logs(&self, run_id: Uuid) -> Result<Vec<LogEntry>> {
        let url = format!("{}/api/runs/{}/logs", self.base_url, run_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
