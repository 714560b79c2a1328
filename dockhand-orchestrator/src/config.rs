//! Trigger server configuration

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::repository::run::DEFAULT_RUN_LIMIT;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline definition file (e.g., "/etc/dockhand/dockhand.toml")
    pub pipeline_path: PathBuf,

    /// Address the HTTP server listens on
    pub bind_addr: String,

    /// Finished runs kept in memory, oldest evicted first
    pub run_history: usize,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DOCKHAND_PIPELINE (optional, default: dockhand.toml)
    /// - DOCKHAND_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - DOCKHAND_RUN_HISTORY (optional, default: 100)
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let run_history = match lookup("DOCKHAND_RUN_HISTORY") {
            Some(value) => value
                .parse::<usize>()
                .with_context(|| format!("DOCKHAND_RUN_HISTORY '{}' is not a number", value))?,
            None => DEFAULT_RUN_LIMIT,
        };

        let config = Self {
            pipeline_path: lookup("DOCKHAND_PIPELINE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("dockhand.toml")),
            bind_addr: lookup("DOCKHAND_BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            run_history,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pipeline_path.as_os_str().is_empty() {
            anyhow::bail!("pipeline path cannot be empty");
        }

        if self.run_history == 0 {
            anyhow::bail!("run history must keep at least one run");
        }

        if self.bind_addr.parse::<SocketAddr>().is_err() {
            anyhow::bail!("bind address '{}' is not a valid socket address", self.bind_addr);
        }

        Ok(())
    }
}
