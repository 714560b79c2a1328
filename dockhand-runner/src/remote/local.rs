//! Local session
//!
//! Runs the deploy command sequence on this machine, for single-box setups
//! where the pipeline and the workload share a host.

use async_trait::async_trait;
use dockhand_core::error::{PipelineError, Result};

use super::RemoteSession;
use crate::engine::{CommandOutput, run_command};

/// Session that executes commands directly
#[derive(Debug, Default)]
pub struct LocalSession;

impl LocalSession {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteSession for LocalSession {
    fn host(&self) -> &str {
        "localhost"
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        run_command(program, args, None)
            .await
            .map_err(|e| PipelineError::deploy(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args;

    #[tokio::test]
    async fn test_local_exec_returns_nonzero_as_output() {
        let session = LocalSession::new();
        let output = session
            .exec("sh", &args(["-c", "echo nope >&2; exit 2"]))
            .await
            .unwrap();
        assert_eq!(output.exit_code, 2);
        assert_eq!(output.error_text(), "nope");
    }

    #[tokio::test]
    async fn test_local_exec_missing_program_is_deploy_failure() {
        let session = LocalSession::new();
        let err = session.exec("dockhand-no-such-binary", &[]).await.unwrap_err();
        assert!(matches!(err, PipelineError::DeployFailure { .. }));
    }
}
