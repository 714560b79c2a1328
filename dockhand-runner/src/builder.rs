//! Image builder
//!
//! Turns a build context and recipe into a tagged artifact. Builds only write
//! to the engine's local storage; nothing leaves the machine until publish.

use async_trait::async_trait;
use dockhand_core::definition::ServiceBuild;
use dockhand_core::domain::artifact::Artifact;
use dockhand_core::error::{PipelineError, Result};
use tracing::{debug, info};

use crate::engine::{ContainerEngine, LOG_TAIL_LINES, args};

/// Builds one service into an artifact
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Builds `service` and tags the result locally as `repository:tag`
    ///
    /// # Returns
    /// The artifact with its content id; its published tag list is empty
    async fn build(&self, service: &ServiceBuild, repository: &str, tag: &str) -> Result<Artifact>;
}

/// Builder backed by the local container engine
pub struct EngineBuilder {
    engine: ContainerEngine,
}

impl EngineBuilder {
    pub fn new(engine: ContainerEngine) -> Self {
        Self { engine }
    }

    fn build_args(service: &ServiceBuild, reference: &str) -> Vec<String> {
        let mut cmd = args(["build", "-f"]);
        cmd.push(service.recipe_path().to_string_lossy().to_string());
        cmd.push("-t".to_string());
        cmd.push(reference.to_string());
        for (key, value) in &service.build_args {
            cmd.push("--build-arg".to_string());
            cmd.push(format!("{}={}", key, value));
        }
        cmd.push(service.context.to_string_lossy().to_string());
        cmd
    }
}

#[async_trait]
impl ImageBuilder for EngineBuilder {
    async fn build(&self, service: &ServiceBuild, repository: &str, tag: &str) -> Result<Artifact> {
        let failure = |message: String, log: String| PipelineError::BuildFailure {
            service: service.name.clone(),
            message,
            log,
        };

        if !service.context.is_dir() {
            return Err(failure(
                format!("build context {} does not exist", service.context.display()),
                String::new(),
            ));
        }

        let recipe = service.recipe_path();
        if !recipe.is_file() {
            return Err(failure(
                format!("build recipe {} does not exist", recipe.display()),
                String::new(),
            ));
        }

        let reference = format!("{}:{}", repository, tag);
        info!("Building {} as {}", service.name, reference);

        let output = self
            .engine
            .run(&Self::build_args(service, &reference))
            .await
            .map_err(|e| failure(format!("{:#}", e), String::new()))?;

        if !output.success() {
            return Err(failure(
                format!(
                    "{} build exited with code {}",
                    self.engine.program(),
                    output.exit_code
                ),
                output.tail(LOG_TAIL_LINES),
            ));
        }

        let inspect = self
            .engine
            .run(&args([
                "image",
                "inspect",
                "--format",
                "{{.Id}}",
                reference.as_str(),
            ]))
            .await
            .map_err(|e| failure(format!("{:#}", e), String::new()))?;

        let id = inspect.stdout.trim().to_string();
        if !inspect.success() || id.is_empty() {
            return Err(failure(
                format!("built image {} could not be inspected", reference),
                inspect.error_text(),
            ));
        }

        debug!("Built {} -> {}", reference, id);

        Ok(Artifact {
            service: service.name.clone(),
            repository: repository.to_string(),
            id,
            tags: Vec::new(),
            context: service.context.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn service(context: PathBuf) -> ServiceBuild {
        ServiceBuild {
            name: "frontend".to_string(),
            context,
            recipe: None,
            image: None,
            build_args: BTreeMap::from([("API_URL".to_string(), "/api".to_string())]),
        }
    }

    #[test]
    fn test_build_args_layout() {
        let svc = service(PathBuf::from("frontend"));
        let cmd = EngineBuilder::build_args(&svc, "acme/frontend:latest");
        assert_eq!(
            cmd,
            vec![
                "build",
                "-f",
                "frontend/Dockerfile",
                "-t",
                "acme/frontend:latest",
                "--build-arg",
                "API_URL=/api",
                "frontend"
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_context_fails_before_engine_runs() {
        // The engine binary does not exist, so reaching it would surface a different message
        let builder = EngineBuilder::new(ContainerEngine::new("dockhand-no-such-engine"));
        let svc = service(PathBuf::from("/nonexistent/frontend"));

        let err = builder.build(&svc, "acme/frontend", "latest").await.unwrap_err();
        match err {
            PipelineError::BuildFailure { service, message, .. } => {
                assert_eq!(service, "frontend");
                assert!(message.contains("build context"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_recipe_is_a_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        let builder = EngineBuilder::new(ContainerEngine::new("dockhand-no-such-engine"));
        let svc = service(dir.path().to_path_buf());

        let err = builder.build(&svc, "acme/frontend", "latest").await.unwrap_err();
        assert!(err.to_string().contains("build recipe"));
    }

    #[tokio::test]
    async fn test_unavailable_engine_is_a_build_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "FROM scratch\n").unwrap();
        let builder = EngineBuilder::new(ContainerEngine::new("dockhand-no-such-engine"));
        let svc = service(dir.path().to_path_buf());

        let err = builder.build(&svc, "acme/frontend", "latest").await.unwrap_err();
        assert!(matches!(err, PipelineError::BuildFailure { .. }));
    }
}
