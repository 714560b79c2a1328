//! Shared server state

use dockhand_core::definition::Secrets;
use dockhand_core::error::Result;
use dockhand_runner::Pipeline;
use std::sync::Arc;

use crate::repository::RunRepository;

/// Where secrets come from when a run is triggered
pub type SecretsSource = Arc<dyn Fn() -> Result<Secrets> + Send + Sync>;

/// State handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub runs: Arc<RunRepository>,
    pub secrets: SecretsSource,
}

impl AppState {
    pub fn new(pipeline: Pipeline, secrets: SecretsSource) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            runs: Arc::new(RunRepository::new()),
            secrets,
        }
    }

    /// Keeps at most `limit` finished runs in the history
    pub fn with_run_history(mut self, limit: usize) -> Self {
        self.runs = Arc::new(RunRepository::with_limit(limit));
        self
    }
}
