//! Container engine management
//!
//! Thin wrapper around the local container engine CLI (podman or docker):
//! - Checking engine availability
//! - Running engine commands and capturing their output
//! - Feeding secrets through stdin instead of the command line

use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// Number of output lines kept when a command's log is attached to an error
pub const LOG_TAIL_LINES: usize = 40;

/// Captured result of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `lines` lines of stdout followed by stderr
    pub fn tail(&self, lines: usize) -> String {
        let combined: Vec<&str> = self
            .stdout
            .lines()
            .chain(self.stderr.lines())
            .filter(|l| !l.trim().is_empty())
            .collect();
        let start = combined.len().saturating_sub(lines);
        combined[start..].join("\n")
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Runs a program to completion, optionally writing `stdin` to it first
pub async fn run_command(
    program: &str,
    args: &[String],
    stdin: Option<&str>,
) -> Result<CommandOutput> {
    debug!("Running: {} {:?}", program, args);

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to execute '{}'. Is it installed?", program))?;

    if let Some(input) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(input.as_bytes())
                .await
                .context("Failed to write to command stdin")?;
            // Closing stdin lets the program see EOF
            drop(pipe);
        }
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("Failed to wait for '{}'", program))?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    };

    if !result.success() {
        debug!(
            "Command failed: {} exit_code={} stderr='{}'",
            program,
            result.exit_code,
            result.stderr.trim()
        );
    }

    Ok(result)
}

/// Local container engine
#[derive(Debug, Clone)]
pub struct ContainerEngine {
    program: String,
}

impl ContainerEngine {
    /// Creates an engine wrapper for a binary (e.g. "podman", "docker")
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Checks that the engine is installed and answering
    ///
    /// # Returns
    /// The engine's version string
    pub async fn check_available(&self) -> Result<String> {
        let output = self
            .run(&["--version".to_string()])
            .await
            .with_context(|| format!("Failed to execute '{} --version'", self.program))?;

        if !output.success() {
            anyhow::bail!("{} is not working correctly: {}", self.program, output.error_text());
        }

        let version = output.stdout.trim().to_string();
        info!("Container engine is available: {}", version);
        Ok(version)
    }

    pub async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        run_command(&self.program, args, None).await
    }

    pub async fn run_with_stdin(&self, args: &[String], stdin: &str) -> Result<CommandOutput> {
        run_command(&self.program, args, Some(stdin)).await
    }
}

/// Builds an owned argument vector from string slices
pub fn args<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}
