//! Run reporting
//!
//! The pipeline pushes every state change and log line of a run through a
//! [`RunReporter`]. The trigger server stores them for its API, the CLI
//! prints them, and tests collect them in memory.

use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::PipelineRun;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Sink for run progress
pub trait RunReporter: Send + Sync {
    /// Records the latest snapshot of a run
    ///
    /// Called after every state or stage change.
    fn update(&self, run: &PipelineRun);

    /// Appends one log line to a run
    ///
    /// # Arguments
    /// * `run_id` - The run the line belongs to
    /// * `entry` - The log entry to add
    fn log(&self, run_id: Uuid, entry: LogEntry);
}

/// Reporter that keeps the latest snapshot and all log lines per run
#[derive(Clone, Default)]
pub struct InMemoryReporter {
    runs: Arc<Mutex<HashMap<Uuid, PipelineRun>>>,
    logs: Arc<Mutex<HashMap<Uuid, Vec<LogEntry>>>>,
}

impl InMemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, id: Uuid) -> Option<PipelineRun> {
        self.runs.lock().ok()?.get(&id).cloned()
    }

    pub fn logs(&self, id: Uuid) -> Vec<LogEntry> {
        self.logs
            .lock()
            .map(|logs| logs.get(&id).cloned().unwrap_or_default())
            .unwrap_or_default()
    }
}

impl RunReporter for InMemoryReporter {
    fn update(&self, run: &PipelineRun) {
        if let Ok(mut runs) = self.runs.lock() {
            runs.insert(run.id, run.clone());
        }
    }

    fn log(&self, run_id: Uuid, entry: LogEntry) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.entry(run_id).or_default().push(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_core::domain::log::LogLevel;
    use dockhand_core::domain::run::{RunState, Trigger};

    #[test]
    fn test_keeps_latest_snapshot_and_all_lines() {
        let reporter = InMemoryReporter::new();
        let mut run = PipelineRun::new("tutorials", Trigger::Manual, &["backend".to_string()]);

        reporter.update(&run);
        run.transition(RunState::Building).unwrap();
        reporter.update(&run);
        reporter.log(run.id, LogEntry::now(LogLevel::Info, None, "first"));
        reporter.log(run.id, LogEntry::now(LogLevel::Info, Some("build-backend"), "second"));

        assert_eq!(reporter.run(run.id).unwrap().state, RunState::Building);
        let lines: Vec<String> = reporter.logs(run.id).into_iter().map(|e| e.message).collect();
        assert_eq!(lines, vec!["first", "second"]);
        assert!(reporter.logs(Uuid::new_v4()).is_empty());
    }
}
