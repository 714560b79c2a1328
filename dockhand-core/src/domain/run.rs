//! Pipeline run domain types
//!
//! A pipeline run is one execution of build -> publish -> deploy. The run
//! state only moves forward along the transitions accepted by
//! [`RunState::can_transition_to`]; a failed run is never resumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::artifact::Artifact;
use crate::error::PipelineError;

/// Overall state of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    /// Created, waiting for the run lock
    Idle,
    Building,
    Publishing,
    Deploying,
    Succeeded,
    Failed,
}

impl RunState {
    /// Whether the pipeline may move from `self` to `next`
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Building)
                | (Building, Publishing)
                | (Building, Failed)
                | (Publishing, Deploying)
                | (Publishing, Failed)
                | (Deploying, Succeeded)
                | (Deploying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Idle => write!(f, "Idle"),
            RunState::Building => write!(f, "Building"),
            RunState::Publishing => write!(f, "Publishing"),
            RunState::Deploying => write!(f, "Deploying"),
            RunState::Succeeded => write!(f, "Succeeded"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// What started a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Source push to the given branch
    Push { branch: String },
    /// Manual invocation (CLI or API)
    Manual,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Push { branch } => write!(f, "push to {}", branch),
            Trigger::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageKind {
    Build,
    Publish,
    Deploy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "Pending"),
            StageStatus::Running => write!(f, "Running"),
            StageStatus::Succeeded => write!(f, "Succeeded"),
            StageStatus::Failed => write!(f, "Failed"),
            StageStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Outcome of one named stage (`build-backend`, `publish-frontend`, `deploy`, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub kind: StageKind,
    pub service: Option<String>,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StageResult {
    fn pending(kind: StageKind, service: Option<&str>) -> Self {
        let name = match (kind, service) {
            (StageKind::Build, Some(s)) => format!("build-{}", s),
            (StageKind::Publish, Some(s)) => format!("publish-{}", s),
            _ => "deploy".to_string(),
        };
        Self {
            name,
            kind,
            service: service.map(str::to_string),
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }
}

/// One end-to-end execution of the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: Trigger,
    pub state: RunState,
    pub stages: Vec<StageResult>,
    pub artifacts: Vec<Artifact>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl PipelineRun {
    /// Creates an idle run with one build and one publish stage per service
    /// followed by the deploy stage
    pub fn new(pipeline: impl Into<String>, trigger: Trigger, services: &[String]) -> Self {
        let mut stages = Vec::with_capacity(services.len() * 2 + 1);
        stages.extend(
            services
                .iter()
                .map(|s| StageResult::pending(StageKind::Build, Some(s))),
        );
        stages.extend(
            services
                .iter()
                .map(|s| StageResult::pending(StageKind::Publish, Some(s))),
        );
        stages.push(StageResult::pending(StageKind::Deploy, None));

        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            state: RunState::Idle,
            stages,
            artifacts: Vec::new(),
            requested_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Moves the run to `next`, rejecting transitions the state machine forbids
    pub fn transition(&mut self, next: RunState) -> Result<(), PipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        let now = Utc::now();
        if self.state == RunState::Idle {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
            // Anything never entered is skipped, not pending
            for stage in &mut self.stages {
                if stage.status == StageStatus::Pending {
                    stage.status = StageStatus::Skipped;
                }
            }
        }
        self.state = next;
        Ok(())
    }

    /// Fails the run from its current state, recording the error
    pub fn fail(&mut self, error: &PipelineError) -> Result<(), PipelineError> {
        self.error = Some(error.to_string());
        self.transition(RunState::Failed)
    }

    pub fn stage(&self, name: &str) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: &str) -> Option<&mut StageResult> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Marks a stage as running
    pub fn start_stage(&mut self, name: &str) {
        if let Some(stage) = self.stage_mut(name) {
            stage.status = StageStatus::Running;
            stage.started_at = Some(Utc::now());
        }
    }

    /// Records the outcome of a running stage
    pub fn finish_stage(&mut self, name: &str, outcome: Result<(), &PipelineError>) {
        if let Some(stage) = self.stage_mut(name) {
            stage.finished_at = Some(Utc::now());
            match outcome {
                Ok(()) => stage.status = StageStatus::Succeeded,
                Err(e) => {
                    stage.status = StageStatus::Failed;
                    stage.error = Some(e.to_string());
                }
            }
        }
    }

    /// Stages of one kind, in declaration order
    pub fn stages_of(&self, kind: StageKind) -> impl Iterator<Item = &StageResult> {
        self.stages.iter().filter(move |s| s.kind == kind)
    }

    /// First failed stage, if any
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> Vec<String> {
        vec!["backend".to_string(), "frontend".to_string()]
    }

    #[test]
    fn test_new_run_lays_out_stages() {
        let run = PipelineRun::new("tutorials", Trigger::Manual, &services());
        let names: Vec<&str> = run.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "build-backend",
                "build-frontend",
                "publish-backend",
                "publish-frontend",
                "deploy"
            ]
        );
        assert_eq!(run.state, RunState::Idle);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut run = PipelineRun::new("tutorials", Trigger::Manual, &services());
        run.transition(RunState::Building).unwrap();
        assert!(run.started_at.is_some());
        run.transition(RunState::Publishing).unwrap();
        run.transition(RunState::Deploying).unwrap();
        run.transition(RunState::Succeeded).unwrap();
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_rejects_skipping_publish() {
        let mut run = PipelineRun::new("tutorials", Trigger::Manual, &services());
        run.transition(RunState::Building).unwrap();
        let err = run.transition(RunState::Deploying).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: RunState::Building,
                to: RunState::Deploying
            }
        ));
        assert_eq!(run.state, RunState::Building);
    }

    #[test]
    fn test_failed_run_cannot_restart() {
        assert!(!RunState::Failed.can_transition_to(RunState::Building));
        assert!(!RunState::Succeeded.can_transition_to(RunState::Idle));
        assert!(!RunState::Idle.can_transition_to(RunState::Failed));
    }

    #[test]
    fn test_fail_skips_pending_stages() {
        let mut run = PipelineRun::new("tutorials", Trigger::Manual, &services());
        run.transition(RunState::Building).unwrap();
        run.start_stage("build-backend");
        let err = PipelineError::BuildFailure {
            service: "backend".to_string(),
            message: "missing dependency".to_string(),
            log: String::new(),
        };
        run.finish_stage("build-backend", Err(&err));
        run.start_stage("build-frontend");
        run.finish_stage("build-frontend", Ok(()));
        run.fail(&err).unwrap();

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.failed_stage().unwrap().name, "build-backend");
        assert_eq!(
            run.stage("build-frontend").unwrap().status,
            StageStatus::Succeeded
        );
        assert!(
            run.stages_of(StageKind::Publish)
                .all(|s| s.status == StageStatus::Skipped)
        );
        assert_eq!(run.stage("deploy").unwrap().status, StageStatus::Skipped);
        assert!(run.error.as_deref().unwrap().contains("missing dependency"));
    }
}
