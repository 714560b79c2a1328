//! Pipeline execution
//!
//! Drives one run through build -> publish -> deploy:
//! - Builds run concurrently, one per service; every sibling is allowed to
//!   finish, but a single failure fails the stage and nothing is published
//! - Publishes run concurrently once every build succeeded
//! - Deploy connects to the target host, reads the descriptor there and
//!   applies it, optionally bounded by the deploy timeout
//!
//! Runs never overlap: each run holds the pipeline's run lock from its first
//! transition to its last. A run waiting for the lock stays `Idle`.

use dockhand_core::definition::{PipelineDefinition, Secrets};
use dockhand_core::domain::artifact::{Artifact, DEFAULT_TAG};
use dockhand_core::domain::instance::ApplyReport;
use dockhand_core::domain::log::{LogEntry, LogLevel};
use dockhand_core::domain::run::{PipelineRun, RunState, StageKind, Trigger};
use dockhand_core::error::{PipelineError, Result};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::builder::{EngineBuilder, ImageBuilder};
use crate::engine::ContainerEngine;
use crate::registry::{ArtifactRegistry, EngineRegistry};
use crate::remote::{self, RemoteExecutor, StandardRemoteExecutor};
use crate::reporter::RunReporter;

const DEPLOY_STAGE: &str = "deploy";

/// A configured pipeline; cheap to share across tasks behind an `Arc`
pub struct Pipeline {
    definition: PipelineDefinition,
    builder: Arc<dyn ImageBuilder>,
    registry: Arc<dyn ArtifactRegistry>,
    executor: Arc<dyn RemoteExecutor>,
    run_lock: Arc<Mutex<()>>,
}

impl Pipeline {
    /// Creates a pipeline from its components
    ///
    /// # Arguments
    /// * `definition` - Validated pipeline definition
    /// * `builder` - Builds service images
    /// * `registry` - Publishes artifacts
    /// * `executor` - Connects to the target host
    pub fn new(
        definition: PipelineDefinition,
        builder: Arc<dyn ImageBuilder>,
        registry: Arc<dyn ArtifactRegistry>,
        executor: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            definition,
            builder,
            registry,
            executor,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Creates a pipeline backed by the local engine, the registry and ssh
    pub fn standard(definition: PipelineDefinition) -> Self {
        let engine = ContainerEngine::new(definition.engine.clone());
        let builder = Arc::new(EngineBuilder::new(engine.clone()));
        let registry = Arc::new(EngineRegistry::new(engine, &definition.registry));
        let executor = Arc::new(StandardRemoteExecutor::new(
            definition.deploy.connect_timeout(),
        ));
        Self::new(definition, builder, registry, executor)
    }

    pub fn definition(&self) -> &PipelineDefinition {
        &self.definition
    }

    /// Creates an idle run for this pipeline
    pub fn new_run(&self, trigger: Trigger) -> PipelineRun {
        PipelineRun::new(
            self.definition.name.clone(),
            trigger,
            &self.definition.service_names(),
        )
    }

    /// Executes a run to completion
    ///
    /// Waits for the run lock first, so overlapping triggers are served one
    /// after the other in arrival order.
    ///
    /// # Arguments
    /// * `run` - An idle run from [`Pipeline::new_run`]
    /// * `secrets` - Registry and host credentials for this run only
    /// * `reporter` - Receives every state change and log line
    ///
    /// # Returns
    /// The run in a terminal state
    pub async fn execute(
        &self,
        mut run: PipelineRun,
        secrets: &Secrets,
        reporter: &dyn RunReporter,
    ) -> PipelineRun {
        reporter.update(&run);

        if run.state != RunState::Idle {
            warn!("Run {} is {} and cannot be started", run.id, run.state);
            return run;
        }

        debug!("Run {} waiting for the run lock", run.id);
        let _guard = self.run_lock.lock().await;

        info!(
            "Starting run {} of '{}' ({})",
            run.id, run.pipeline, run.trigger
        );
        self.log(
            &run,
            reporter,
            LogLevel::Info,
            None,
            format!("Run triggered by {}", run.trigger),
        );

        match self.drive(&mut run, secrets, reporter).await {
            Ok(report) => {
                info!("Run {} succeeded", run.id);
                self.log(
                    &run,
                    reporter,
                    LogLevel::Info,
                    None,
                    format!(
                        "Run succeeded: {} recreated, {} restarted, {} unchanged",
                        report.recreated.len(),
                        report.restarted.len(),
                        report.unchanged.len()
                    ),
                );
            }
            Err(e) => {
                error!("Run {} failed ({}): {}", run.id, e.kind(), e);
                if let Err(transition) = run.fail(&e) {
                    warn!("Run {} could not be marked failed: {}", run.id, transition);
                }
                self.log(
                    &run,
                    reporter,
                    LogLevel::Error,
                    None,
                    format!("Run failed: {}", e),
                );
                if e.is_auth() {
                    let stage = run.failed_stage().map(|s| s.kind);
                    self.log(&run, reporter, LogLevel::Warning, None, auth_hint(stage));
                }
            }
        }

        reporter.update(&run);
        run
    }

    async fn drive(
        &self,
        run: &mut PipelineRun,
        secrets: &Secrets,
        reporter: &dyn RunReporter,
    ) -> Result<ApplyReport> {
        self.build_all(run, reporter).await?;
        self.publish_all(run, secrets, reporter).await?;
        let report = self.deploy(run, secrets, reporter).await?;
        run.transition(RunState::Succeeded)?;
        Ok(report)
    }

    async fn build_all(&self, run: &mut PipelineRun, reporter: &dyn RunReporter) -> Result<()> {
        run.transition(RunState::Building)?;
        let tag = self
            .definition
            .registry
            .tags
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_TAG);

        for service in &self.definition.services {
            run.start_stage(&format!("build-{}", service.name));
        }
        reporter.update(run);

        let builds = self.definition.services.iter().map(|service| {
            let repository = self.definition.repository(service);
            async move {
                let result = self.builder.build(service, &repository, tag).await;
                (service, result)
            }
        });
        let results = join_all(builds).await;

        let mut first_error = None;
        for (service, result) in results {
            let stage = format!("build-{}", service.name);
            match result {
                Ok(artifact) => {
                    run.finish_stage(&stage, Ok(()));
                    self.log(
                        run,
                        reporter,
                        LogLevel::Info,
                        Some(&stage),
                        format!("Built {} ({})", artifact.reference(tag), artifact.short_id()),
                    );
                    run.artifacts.push(artifact);
                }
                Err(e) => {
                    run.finish_stage(&stage, Err(&e));
                    self.log(run, reporter, LogLevel::Error, Some(&stage), e.to_string());
                    if let PipelineError::BuildFailure { log, .. } = &e {
                        for line in log.lines() {
                            self.log(run, reporter, LogLevel::Debug, Some(&stage), line);
                        }
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        reporter.update(run);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn publish_all(
        &self,
        run: &mut PipelineRun,
        secrets: &Secrets,
        reporter: &dyn RunReporter,
    ) -> Result<()> {
        run.transition(RunState::Publishing)?;
        let stages: Vec<String> = run
            .stages_of(StageKind::Publish)
            .map(|s| s.name.clone())
            .collect();
        for stage in &stages {
            run.start_stage(stage);
        }
        reporter.update(run);

        if let Err(e) = self.registry.login(secrets.registry.as_ref()).await {
            for stage in &stages {
                run.finish_stage(stage, Err(&e));
            }
            self.log(run, reporter, LogLevel::Error, None, e.to_string());
            reporter.update(run);
            return Err(e);
        }

        let tags = &self.definition.registry.tags;
        let artifacts: Vec<Artifact> = run.artifacts.clone();
        let publishes = artifacts.iter().map(|artifact| async move {
            let result = self.registry.publish(artifact, tags).await;
            (artifact.service.clone(), result)
        });
        let results = join_all(publishes).await;

        let mut first_error = None;
        for (service, result) in results {
            let stage = format!("publish-{}", service);
            match result {
                Ok(pushed) => {
                    run.finish_stage(&stage, Ok(()));
                    let artifact = run.artifacts.iter_mut().find(|a| a.service == service);
                    if let Some(artifact) = artifact {
                        artifact.tags = tags.clone();
                    }
                    for reference in pushed {
                        self.log(
                            run,
                            reporter,
                            LogLevel::Info,
                            Some(&stage),
                            format!("Pushed {}", reference),
                        );
                    }
                }
                Err(e) => {
                    run.finish_stage(&stage, Err(&e));
                    self.log(run, reporter, LogLevel::Error, Some(&stage), e.to_string());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        reporter.update(run);

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn deploy(
        &self,
        run: &mut PipelineRun,
        secrets: &Secrets,
        reporter: &dyn RunReporter,
    ) -> Result<ApplyReport> {
        run.transition(RunState::Deploying)?;
        run.start_stage(DEPLOY_STAGE);
        reporter.update(run);

        let deploy = &self.definition.deploy;
        self.log(
            run,
            reporter,
            LogLevel::Info,
            Some(DEPLOY_STAGE),
            format!("Deploying {} to {}", deploy.descriptor, secrets.host.address),
        );

        let apply = async {
            let session = self.executor.connect(&secrets.host).await?;
            let descriptor = remote::read_descriptor(session.as_ref(), &deploy.descriptor).await?;
            remote::apply(session.as_ref(), &deploy.engine, &descriptor).await
        };

        let result = match deploy.timeout() {
            Some(limit) => tokio::time::timeout(limit, apply).await.unwrap_or_else(|_| {
                Err(PipelineError::deploy(format!(
                    "deploy did not finish within {}s",
                    limit.as_secs()
                )))
            }),
            None => apply.await,
        };

        match &result {
            Ok(report) => {
                run.finish_stage(DEPLOY_STAGE, Ok(()));
                for service in &report.recreated {
                    self.log(
                        run,
                        reporter,
                        LogLevel::Info,
                        Some(DEPLOY_STAGE),
                        format!("Recreated {}", service),
                    );
                }
                for service in &report.restarted {
                    self.log(
                        run,
                        reporter,
                        LogLevel::Info,
                        Some(DEPLOY_STAGE),
                        format!("Restarted {}", service),
                    );
                }
                for service in &report.unchanged {
                    self.log(
                        run,
                        reporter,
                        LogLevel::Info,
                        Some(DEPLOY_STAGE),
                        format!("Unchanged {}", service),
                    );
                }
            }
            Err(e) => {
                run.finish_stage(DEPLOY_STAGE, Err(e));
                self.log(
                    run,
                    reporter,
                    LogLevel::Error,
                    Some(DEPLOY_STAGE),
                    e.to_string(),
                );
            }
        }
        reporter.update(run);

        result
    }

    fn log(
        &self,
        run: &PipelineRun,
        reporter: &dyn RunReporter,
        level: LogLevel,
        stage: Option<&str>,
        message: impl Into<String>,
    ) {
        reporter.log(run.id, LogEntry::now(level, stage, message));
    }
}

/// Which secrets to look at after an authentication failure in `stage`
fn auth_hint(stage: Option<StageKind>) -> &'static str {
    match stage {
        Some(StageKind::Deploy) => "Check DOCKHAND_HOST, DOCKHAND_SSH_USER and DOCKHAND_SSH_KEY",
        _ => "Check DOCKHAND_REGISTRY_USER and DOCKHAND_REGISTRY_PASSWORD",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::InMemoryReporter;
    use crate::testing::{FakeBuilder, FakeHost, FakeRegistry};
    use dockhand_core::definition::HostTarget;
    use dockhand_core::domain::run::StageStatus;
    use std::time::Duration;

    const DEFINITION: &str = r#"
name = "tutorials"

[registry]
host = "registry.example.com"
namespace = "acme"

[[service]]
name = "backend"
context = "backend"

[[service]]
name = "frontend"
context = "frontend"

[deploy]
descriptor = "/srv/tutorials/compose.yml"
"#;

    const DESCRIPTOR: &str = r#"
project: tutorials
services:
  mongo:
    image: mongo:6
    volumes: ["mongo_data:/data/db"]
  backend:
    image: registry.example.com/acme/backend:latest
    depends_on: [mongo]
  frontend:
    image: registry.example.com/acme/frontend:latest
    ports: ["80:80"]
    depends_on: [backend]
volumes:
  mongo_data: {}
"#;

    struct Harness {
        builder: FakeBuilder,
        registry: FakeRegistry,
        host: FakeHost,
        pipeline: Arc<Pipeline>,
        reporter: InMemoryReporter,
    }

    fn harness_with(definition: &str) -> Harness {
        let builder = FakeBuilder::new();
        let registry = FakeRegistry::new();
        registry.seed("mongo:6", "sha256:mongo-6");
        let host = FakeHost::new(registry.clone());
        host.put_file("/srv/tutorials/compose.yml", DESCRIPTOR);

        let pipeline = Arc::new(Pipeline::new(
            PipelineDefinition::parse(definition).unwrap(),
            Arc::new(builder.clone()),
            Arc::new(registry.clone()),
            Arc::new(host.clone()),
        ));

        Harness {
            builder,
            registry,
            host,
            pipeline,
            reporter: InMemoryReporter::new(),
        }
    }

    fn harness() -> Harness {
        harness_with(DEFINITION)
    }

    fn secrets() -> Secrets {
        Secrets {
            registry: None,
            host: HostTarget {
                address: "203.0.113.10".to_string(),
                user: Some("deploy".to_string()),
                port: 22,
                identity: None,
            },
        }
    }

    async fn run_once(h: &Harness) -> PipelineRun {
        let run = h.pipeline.new_run(Trigger::Manual);
        h.pipeline.execute(run, &secrets(), &h.reporter).await
    }

    fn status(run: &PipelineRun, stage: &str) -> StageStatus {
        run.stage(stage).map(|s| s.status).unwrap()
    }

    #[tokio::test]
    async fn test_successful_run_builds_publishes_and_deploys() {
        let h = harness();

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Succeeded);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Succeeded));
        assert_eq!(run.artifacts.len(), 2);
        assert!(run.artifacts.iter().all(|a| a.tags == vec!["latest"]));
        assert_eq!(h.registry.logins(), 1);
        assert_eq!(
            h.registry.lookup("registry.example.com/acme/backend:latest"),
            run.artifacts.iter().find(|a| a.service == "backend").map(|a| a.id.clone())
        );
        assert_eq!(h.host.connects(), 1);
        assert_eq!(h.host.started(), vec![
            "tutorials-mongo",
            "tutorials-backend",
            "tutorials-frontend"
        ]);
        assert!(run.started_at.is_some());
        assert!(run.finished_at.is_some());

        let stored = h.reporter.run(run.id).unwrap();
        assert_eq!(stored.state, RunState::Succeeded);
        assert!(!h.reporter.logs(run.id).is_empty());
    }

    #[tokio::test]
    async fn test_every_tag_resolves_to_the_same_artifact() {
        use crate::registry::ArtifactRegistry;

        let definition = DEFINITION.replace(
            "namespace = \"acme\"",
            "namespace = \"acme\"\ntags = [\"latest\", \"v1\"]",
        );
        let h = harness_with(&definition);

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Succeeded);
        let backend = run.artifacts.iter().find(|a| a.service == "backend").unwrap();
        assert_eq!(backend.tags, vec!["latest", "v1"]);
        for tag in ["latest", "v1"] {
            let digest = h
                .registry
                .resolve("registry.example.com/acme/backend", tag, None)
                .await
                .unwrap();
            assert_eq!(digest, backend.id);
        }
    }

    #[tokio::test]
    async fn test_build_failure_publishes_nothing_and_never_deploys() {
        let h = harness();
        h.builder.fail("backend");

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "build-backend"), StageStatus::Failed);
        // Siblings still finish
        assert_eq!(status(&run, "build-frontend"), StageStatus::Succeeded);
        assert_eq!(status(&run, "publish-backend"), StageStatus::Skipped);
        assert_eq!(status(&run, "publish-frontend"), StageStatus::Skipped);
        assert_eq!(status(&run, "deploy"), StageStatus::Skipped);
        assert!(h.registry.published().is_empty());
        assert_eq!(h.host.connects(), 0);
        assert_eq!(run.failed_stage().map(|s| s.name.as_str()), Some("build-backend"));
        assert!(run.error.as_deref().unwrap().contains("backend"));

        let logs = h.reporter.logs(run.id);
        assert!(logs.iter().any(|l| l.message.contains("npm ERR!")));
    }

    #[tokio::test]
    async fn test_registry_auth_failure_never_deploys() {
        let h = harness();
        h.registry.reject_credentials();

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "publish-backend"), StageStatus::Failed);
        assert_eq!(status(&run, "publish-frontend"), StageStatus::Failed);
        assert_eq!(status(&run, "deploy"), StageStatus::Skipped);
        assert_eq!(h.host.connects(), 0);
        assert!(h.registry.published().is_empty());
        assert!(run.error.as_deref().unwrap().contains("authentication"));
        assert!(h
            .reporter
            .logs(run.id)
            .iter()
            .any(|l| l.message.contains("DOCKHAND_REGISTRY_USER")));
    }

    #[tokio::test]
    async fn test_publish_failure_of_one_service_fails_run() {
        let h = harness();
        h.registry.fail_publish_of("frontend");

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "publish-backend"), StageStatus::Succeeded);
        assert_eq!(status(&run, "publish-frontend"), StageStatus::Failed);
        assert_eq!(h.host.connects(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_host_leaves_running_instances_untouched() {
        let h = harness();
        let first = run_once(&h).await;
        assert_eq!(first.state, RunState::Succeeded);
        let deployed_backend = first
            .artifacts
            .iter()
            .find(|a| a.service == "backend")
            .map(|a| a.id.clone());
        let started_before = h.host.started();

        h.host.set_unreachable();
        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "deploy"), StageStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("timed out"));
        let rebuilt_backend = run.artifacts.iter().find(|a| a.service == "backend").unwrap();
        assert_ne!(Some(rebuilt_backend.id.clone()), deployed_backend);
        assert_eq!(h.host.container_image("tutorials-backend"), deployed_backend);
        assert_eq!(h.host.started(), started_before);
    }

    #[tokio::test]
    async fn test_host_auth_failure_fails_deploy() {
        let h = harness();
        h.host.reject_credentials();

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert!(run.error.as_deref().unwrap().contains("Permission denied"));
        assert!(h
            .reporter
            .logs(run.id)
            .iter()
            .any(|l| l.message.contains("DOCKHAND_SSH_KEY")));
    }

    #[tokio::test]
    async fn test_missing_descriptor_fails_deploy() {
        let h = harness_with(&DEFINITION.replace("/srv/tutorials/compose.yml", "/srv/other.yml"));

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "deploy"), StageStatus::Failed);
    }

    #[tokio::test]
    async fn test_rerun_without_changes_only_recreates_rebuilt_services() {
        let h = harness();

        run_once(&h).await;
        let started_before = h.host.started().len();
        let second = run_once(&h).await;

        assert_eq!(second.state, RunState::Succeeded);
        // Fresh builds get fresh ids, mongo is untouched
        let started: Vec<String> = h.host.started()[started_before..].to_vec();
        assert_eq!(started, vec!["tutorials-backend", "tutorials-frontend"]);
    }

    #[tokio::test]
    async fn test_deploy_timeout_fails_run() {
        let h = harness_with(&format!("{}timeout_secs = 1\n", DEFINITION));
        h.host.slow_down(Duration::from_millis(400));

        let run = run_once(&h).await;

        assert_eq!(run.state, RunState::Failed);
        assert_eq!(status(&run, "deploy"), StageStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("within 1s"));
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_serialised() {
        let h = harness();
        h.builder.slow_down(Duration::from_millis(50));

        let first = h.pipeline.new_run(Trigger::Manual);
        let second = h.pipeline.new_run(Trigger::Push {
            branch: "main".to_string(),
        });
        let secrets = secrets();

        let (first, second) = tokio::join!(
            h.pipeline.execute(first, &secrets, &h.reporter),
            h.pipeline.execute(second, &secrets, &h.reporter)
        );

        assert_eq!(first.state, RunState::Succeeded);
        assert_eq!(second.state, RunState::Succeeded);

        let (earlier, later) = if first.started_at <= second.started_at {
            (&first, &second)
        } else {
            (&second, &first)
        };
        assert!(later.started_at >= earlier.finished_at);

        // No build of the second run starts before the first run's builds end
        let events = h.builder.events();
        assert_eq!(
            events[..4].iter().filter(|e| e.starts_with("end:")).count(),
            2
        );
    }

    #[tokio::test]
    async fn test_finished_run_is_not_restarted() {
        let h = harness();
        let run = run_once(&h).await;
        let connects = h.host.connects();

        let again = h.pipeline.execute(run.clone(), &secrets(), &h.reporter).await;

        assert_eq!(again.state, RunState::Succeeded);
        assert_eq!(again.finished_at, run.finished_at);
        assert_eq!(h.host.connects(), connects);
    }
}
