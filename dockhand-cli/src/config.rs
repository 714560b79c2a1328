//! Configuration module
//!
//! Handles CLI configuration: trigger server URL and pipeline definition.

use anyhow::{Context, Result};
use dockhand_core::definition::PipelineDefinition;
use std::path::PathBuf;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the trigger server
    pub server_url: String,

    /// Pipeline definition file
    pub pipeline_path: PathBuf,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.server_url.starts_with("http://") && !self.server_url.starts_with("https://") {
            anyhow::bail!("server URL must start with http:// or https://");
        }
        Ok(())
    }

    /// Loads and validates the pipeline definition
    pub fn load_definition(&self) -> Result<PipelineDefinition> {
        PipelineDefinition::load(&self.pipeline_path).with_context(|| {
            format!(
                "Failed to load pipeline definition {}",
                self.pipeline_path.display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_url_must_be_http() {
        let mut config = Config {
            server_url: "http://localhost:8080".to_string(),
            pipeline_path: PathBuf::from("dockhand.toml"),
        };
        assert!(config.validate().is_ok());

        config.server_url = "localhost:8080".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_definition_names_the_file() {
        let config = Config {
            server_url: "http://localhost:8080".to_string(),
            pipeline_path: PathBuf::from("/nonexistent/dockhand.toml"),
        };
        let err = config.load_definition().unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/dockhand.toml"));
    }
}
