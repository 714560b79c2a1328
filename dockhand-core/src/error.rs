//! Pipeline error taxonomy
//!
//! Every stage failure is terminal for the run that hit it. None of these
//! errors is retried by the pipeline; recovery is a new trigger.

use std::time::Duration;
use thiserror::Error;

use crate::domain::instance::ApplyReport;
use crate::domain::run::RunState;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors produced by the build, publish and deploy components
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Build recipe error, missing dependency or failing build step
    #[error("build of '{service}' failed: {message}")]
    BuildFailure {
        service: String,
        message: String,
        /// Tail of the engine's build output
        log: String,
    },

    /// Credentials rejected by the registry or the target host
    #[error("authentication to {target} failed: {message}")]
    AuthFailure { target: String, message: String },

    /// Network, quota or registry error while publishing or resolving
    #[error("publish of {reference} failed: {message}")]
    PublishFailure { reference: String, message: String },

    /// Target host unreachable within the connect timeout
    #[error("connection to {host} timed out after {}s", .after.as_secs())]
    ConnectTimeout { host: String, after: Duration },

    /// Apply step failed on the host; `report` holds what was already done
    #[error("deploy failed: {message}")]
    DeployFailure {
        message: String,
        report: ApplyReport,
    },

    /// The composition descriptor could not be parsed or is inconsistent
    #[error("invalid composition descriptor: {0}")]
    InvalidDescriptor(String),

    /// The pipeline definition is unusable
    #[error("invalid pipeline definition: {0}")]
    InvalidDefinition(String),

    /// A run state change the state machine does not allow
    #[error("invalid run transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

impl PipelineError {
    /// Deploy failure that touched nothing on the host
    pub fn deploy(message: impl Into<String>) -> Self {
        Self::DeployFailure {
            message: message.into(),
            report: ApplyReport::default(),
        }
    }

    /// Whether the error came from rejected credentials
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthFailure { .. })
    }

    /// Short machine-friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BuildFailure { .. } => "BuildFailure",
            Self::AuthFailure { .. } => "AuthFailure",
            Self::PublishFailure { .. } => "PublishFailure",
            Self::ConnectTimeout { .. } => "ConnectTimeout",
            Self::DeployFailure { .. } => "DeployFailure",
            Self::InvalidDescriptor(_) => "InvalidDescriptor",
            Self::InvalidDefinition(_) => "InvalidDefinition",
            Self::InvalidTransition { .. } => "InvalidTransition",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_message() {
        let err = PipelineError::ConnectTimeout {
            host: "203.0.113.10".to_string(),
            after: Duration::from_secs(15),
        };
        assert_eq!(
            err.to_string(),
            "connection to 203.0.113.10 timed out after 15s"
        );
        assert_eq!(err.kind(), "ConnectTimeout");
    }

    #[test]
    fn test_deploy_helper_has_empty_report() {
        match PipelineError::deploy("pull failed") {
            PipelineError::DeployFailure { message, report } => {
                assert_eq!(message, "pull failed");
                assert!(report.is_noop());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
