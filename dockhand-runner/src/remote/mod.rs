//! Remote executor
//!
//! Opens an authenticated session to the single target host and runs the
//! deploy command sequence there. Sessions are routed by target:
//! - `local` / `localhost`: commands run directly on this machine
//! - anything else: commands run through the system `ssh` client
//!
//! The apply step itself is session-agnostic and lives in [`apply`].

pub mod apply;
mod local;
mod ssh;

pub use apply::{apply, read_descriptor};
pub use local::LocalSession;
pub use ssh::SshSession;

use async_trait::async_trait;
use dockhand_core::definition::HostTarget;
use dockhand_core::error::Result;
use std::time::Duration;

use crate::engine::CommandOutput;

/// Connects to a target host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Establishes an authenticated session
    ///
    /// Fails with `AuthFailure` when the host rejects the credentials and
    /// `ConnectTimeout` when it cannot be reached in time.
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>>;
}

/// An open session on the target host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Host the session is attached to
    fn host(&self) -> &str;

    /// Runs one command on the host
    ///
    /// A non-zero exit status is returned as output, not as an error; errors
    /// are reserved for transport failures.
    async fn exec(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

/// Standard executor: local sessions for `localhost`, ssh otherwise
pub struct StandardRemoteExecutor {
    connect_timeout: Duration,
}

impl StandardRemoteExecutor {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl RemoteExecutor for StandardRemoteExecutor {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>> {
        if target.is_local() {
            return Ok(Box::new(LocalSession::new()));
        }

        let session = SshSession::connect(target.clone(), self.connect_timeout).await?;
        Ok(Box::new(session))
    }
}

/// Quotes one word for a POSIX shell
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Joins a program and its arguments into one shell command line
pub fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}
