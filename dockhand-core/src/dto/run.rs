//! Run DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{PipelineRun, RunState, Trigger};

/// Source push webhook body
///
/// Only the pushed ref is read; everything else in the payload is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
}

impl PushEvent {
    /// Branch name for `refs/heads/<branch>` refs
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }
}

/// Answer to a webhook delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub accepted: bool,
    pub run_id: Option<Uuid>,
    pub reason: Option<String>,
}

/// Lightweight run summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: Trigger,
    pub state: RunState,
    pub requested_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Name of the first failed stage, if any
    pub failed_stage: Option<String>,
}

impl From<&PipelineRun> for RunSummary {
    fn from(run: &PipelineRun) -> Self {
        Self {
            id: run.id,
            pipeline: run.pipeline.clone(),
            trigger: run.trigger.clone(),
            state: run.state,
            requested_at: run.requested_at,
            finished_at: run.finished_at,
            failed_stage: run.failed_stage().map(|s| s.name.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_event_branch() {
        let event: PushEvent =
            serde_json::from_str(r#"{"ref": "refs/heads/main", "after": "abc123"}"#).unwrap();
        assert_eq!(event.branch(), Some("main"));

        let tag = PushEvent {
            git_ref: "refs/tags/v1".to_string(),
        };
        assert_eq!(tag.branch(), None);
    }

    #[test]
    fn test_summary_from_run() {
        let run = PipelineRun::new("tutorials", Trigger::Manual, &["backend".to_string()]);
        let summary = RunSummary::from(&run);
        assert_eq!(summary.id, run.id);
        assert_eq!(summary.state, RunState::Idle);
        assert!(summary.failed_stage.is_none());
    }
}
