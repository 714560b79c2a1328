//! SSH session
//!
//! Uses the system `ssh` client in batch mode so host keys, agents and
//! `~/.ssh/config` behave exactly as they do for an operator. Every command
//! is a separate `ssh` invocation; connection reuse is left to the client's
//! own multiplexing settings.

use async_trait::async_trait;
use dockhand_core::definition::HostTarget;
use dockhand_core::error::{PipelineError, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{RemoteSession, command_line};
use crate::engine::{CommandOutput, run_command};

/// ssh reserves exit status 255 for its own errors
const SSH_ERROR_EXIT: i32 = 255;

/// Session on a remote host reached over ssh
#[derive(Debug, Clone)]
pub struct SshSession {
    target: HostTarget,
    connect_timeout: Duration,
}

impl SshSession {
    /// Opens a session and verifies it with a probe command
    ///
    /// The probe is bounded by `connect_timeout` on both sides: ssh's own
    /// `ConnectTimeout` option and a local timer around the whole call.
    pub async fn connect(target: HostTarget, connect_timeout: Duration) -> Result<Self> {
        let session = Self {
            target,
            connect_timeout,
        };

        info!("Connecting to {}", session.target.destination());

        let timed_out = || PipelineError::ConnectTimeout {
            host: session.target.address.clone(),
            after: connect_timeout,
        };

        let check_args = session.ssh_args("true");
        let check = run_command("ssh", &check_args, None);
        let output = tokio::time::timeout(connect_timeout + Duration::from_secs(1), check)
            .await
            .map_err(|_| timed_out())?
            .map_err(|e| PipelineError::deploy(format!("{:#}", e)))?;

        if !output.success() {
            return Err(classify_connect_failure(&session.target, connect_timeout, &output));
        }

        debug!("Session to {} established", session.target.address);
        Ok(session)
    }

    fn ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-p".to_string(),
            self.target.port.to_string(),
        ];
        if let Some(identity) = &self.target.identity {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.push(self.target.destination());
        args.push("--".to_string());
        args.push(remote_command.to_string());
        args
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host(&self) -> &str {
        &self.target.address
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        debug!("[{}] {}", self.target.address, line);

        let output = run_command("ssh", &self.ssh_args(&line), None)
            .await
            .map_err(|e| PipelineError::deploy(format!("{:#}", e)))?;

        if output.exit_code == SSH_ERROR_EXIT {
            warn!(
                "ssh to {} failed mid-session: {}",
                self.target.address,
                output.error_text()
            );
            return Err(PipelineError::deploy(format!(
                "lost connection to {}: {}",
                self.target.address,
                output.error_text()
            )));
        }

        Ok(output)
    }
}

fn classify_connect_failure(
    target: &HostTarget,
    connect_timeout: Duration,
    output: &CommandOutput,
) -> PipelineError {
    let text = output.error_text();
    let lower = text.to_lowercase();

    if lower.contains("permission denied")
        || lower.contains("too many authentication failures")
        || lower.contains("host key verification failed")
    {
        return PipelineError::AuthFailure {
            target: target.destination(),
            message: text,
        };
    }

    if lower.contains("timed out")
        || lower.contains("no route to host")
        || lower.contains("connection refused")
        || lower.contains("could not resolve hostname")
        || lower.contains("network is unreachable")
    {
        return PipelineError::ConnectTimeout {
            host: target.address.clone(),
            after: connect_timeout,
        };
    }

    PipelineError::deploy(format!(
        "ssh to {} exited with {}: {}",
        target.address, output.exit_code, text
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> HostTarget {
        HostTarget {
            address: "203.0.113.10".to_string(),
            user: Some("deploy".to_string()),
            port: 2222,
            identity: Some(PathBuf::from("/keys/deploy")),
        }
    }

    fn failed(stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: SSH_ERROR_EXIT,
        }
    }

    #[test]
    fn test_ssh_args_layout() {
        let session = SshSession {
            target: target(),
            connect_timeout: Duration::from_secs(10),
        };
        let args = session.ssh_args("docker ps");
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "2222",
                "-i",
                "/keys/deploy",
                "deploy@203.0.113.10",
                "--",
                "docker ps"
            ]
        );
    }

    #[test]
    fn test_classify_auth_failure() {
        let err = classify_connect_failure(
            &target(),
            Duration::from_secs(5),
            &failed("deploy@203.0.113.10: Permission denied (publickey)."),
        );
        assert!(err.is_auth());
    }

    #[test]
    fn test_classify_unreachable_as_timeout() {
        let err = classify_connect_failure(
            &target(),
            Duration::from_secs(5),
            &failed("ssh: connect to host 203.0.113.10 port 2222: Connection timed out"),
        );
        assert!(matches!(err, PipelineError::ConnectTimeout { .. }));
    }

    #[test]
    fn test_classify_other_errors_as_deploy_failure() {
        let err = classify_connect_failure(
            &target(),
            Duration::from_secs(5),
            &failed("kex_exchange_identification: read: Connection reset by peer"),
        );
        assert!(matches!(err, PipelineError::DeployFailure { .. }));
    }
}
