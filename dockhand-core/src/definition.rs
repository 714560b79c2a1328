//! Pipeline definition and secrets
//!
//! The definition (`dockhand.toml`) is committed next to the source tree and
//! describes what to build, where to publish it and where the descriptor
//! lives on the host. Secrets never appear in it: they are read from the
//! environment when a run is triggered and only ever held in memory.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, Result};

/// Pipeline definition loaded from `dockhand.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineDefinition {
    pub name: String,

    /// Branch whose pushes trigger a run
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Local container engine used to build and push
    #[serde(default = "default_engine")]
    pub engine: String,

    pub registry: RegistryConfig,

    #[serde(rename = "service")]
    pub services: Vec<ServiceBuild>,

    pub deploy: DeployConfig,
}

/// Registry the artifacts are published to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryConfig {
    /// Registry host (e.g. "docker.io", "ghcr.io", "localhost:5000")
    pub host: String,

    /// Account or organisation the repositories live under
    pub namespace: String,

    /// Tags every artifact is published under, in order
    #[serde(default = "default_tags")]
    pub tags: Vec<String>,

    /// Use plain HTTP for the registry API (local registries only)
    #[serde(default)]
    pub insecure: bool,
}

/// How to build one service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceBuild {
    pub name: String,

    /// Build context directory, relative to the definition file
    pub context: PathBuf,

    /// Build recipe, relative to the definition file (default: `<context>/Dockerfile`)
    #[serde(default)]
    pub recipe: Option<PathBuf>,

    /// Repository name under the namespace (default: the service name)
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

impl ServiceBuild {
    pub fn recipe_path(&self) -> PathBuf {
        self.recipe
            .clone()
            .unwrap_or_else(|| self.context.join("Dockerfile"))
    }

    pub fn image_name(&self) -> &str {
        self.image.as_deref().unwrap_or(&self.name)
    }
}

/// Where and how to deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeployConfig {
    /// Path of the composition descriptor on the target host
    pub descriptor: String,

    /// Container engine binary on the target host
    #[serde(default = "default_remote_engine")]
    pub engine: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound for the whole deploy stage; unbounded when absent
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl DeployConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_engine() -> String {
    "podman".to_string()
}

fn default_remote_engine() -> String {
    "docker".to_string()
}

fn default_tags() -> Vec<String> {
    vec!["latest".to_string()]
}

fn default_connect_timeout() -> u64 {
    15
}

impl PipelineDefinition {
    /// Parses and validates a definition from TOML text
    pub fn parse(source: &str) -> Result<Self> {
        let definition: Self = toml::from_str(source)
            .map_err(|e| PipelineError::InvalidDefinition(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Loads a definition file and makes service paths relative to its directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidDefinition(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut definition = Self::parse(&source)?;

        if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            for service in &mut definition.services {
                service.context = base.join(&service.context);
                service.recipe = service.recipe.take().map(|r| base.join(r));
            }
        }

        Ok(definition)
    }

    /// Validates the definition
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(definition_error("name cannot be empty"));
        }

        if self.services.is_empty() {
            return Err(definition_error("at least one service must be defined"));
        }

        let mut seen = std::collections::HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(definition_error("service name cannot be empty"));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(definition_error(format!(
                    "service '{}' is defined twice",
                    service.name
                )));
            }
        }

        if self.registry.host.trim().is_empty() {
            return Err(definition_error("registry.host cannot be empty"));
        }

        if self.registry.tags.is_empty() {
            return Err(definition_error("registry.tags cannot be empty"));
        }

        if self.registry.tags.iter().any(|t| t.trim().is_empty() || t.contains(':')) {
            return Err(definition_error("registry.tags contains an invalid tag"));
        }

        if self.deploy.descriptor.trim().is_empty() {
            return Err(definition_error("deploy.descriptor cannot be empty"));
        }

        if self.deploy.connect_timeout_secs == 0 {
            return Err(definition_error(
                "deploy.connect_timeout_secs must be greater than 0",
            ));
        }

        Ok(())
    }

    /// Service names in definition order
    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    /// Fully-qualified repository for a service
    pub fn repository(&self, service: &ServiceBuild) -> String {
        let host = self.registry.host.trim_end_matches('/');
        let namespace = self.registry.namespace.trim_matches('/');
        if namespace.is_empty() {
            format!("{}/{}", host, service.image_name())
        } else {
            format!("{}/{}/{}", host, namespace, service.image_name())
        }
    }
}

fn definition_error(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidDefinition(message.into())
}

/// Registry login
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl RegistryCredentials {
    /// Reads DOCKHAND_REGISTRY_USER / DOCKHAND_REGISTRY_PASSWORD from the environment
    pub fn from_env() -> Result<Option<Self>> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads credentials through a lookup function; both or neither must be set
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<Self>> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        match (
            non_empty("DOCKHAND_REGISTRY_USER"),
            non_empty("DOCKHAND_REGISTRY_PASSWORD"),
        ) {
            (Some(username), Some(password)) => Ok(Some(Self { username, password })),
            (None, None) => Ok(None),
            _ => Err(PipelineError::InvalidDefinition(
                "DOCKHAND_REGISTRY_USER and DOCKHAND_REGISTRY_PASSWORD must be set together"
                    .into(),
            )),
        }
    }
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Target host and how to log in to it
#[derive(Debug, Clone)]
pub struct HostTarget {
    /// Host name or address; `local`/`localhost` runs commands in-process
    pub address: String,
    pub user: Option<String>,
    pub port: u16,
    /// Private key file; the ssh agent and config are used when absent
    pub identity: Option<PathBuf>,
}

impl HostTarget {
    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "local" | "localhost")
    }

    /// `user@host` form for ssh
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// Secrets supplied out-of-band for one run
#[derive(Debug, Clone)]
pub struct Secrets {
    pub registry: Option<RegistryCredentials>,
    pub host: HostTarget,
}

impl Secrets {
    /// Reads secrets from the environment
    ///
    /// Expected environment variables:
    /// - DOCKHAND_HOST (required)
    /// - DOCKHAND_SSH_USER (optional)
    /// - DOCKHAND_SSH_PORT (optional, default: 22)
    /// - DOCKHAND_SSH_KEY (optional, path to a private key)
    /// - DOCKHAND_REGISTRY_USER / DOCKHAND_REGISTRY_PASSWORD (optional, both or neither)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads secrets through an arbitrary lookup function
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let address = non_empty("DOCKHAND_HOST").ok_or_else(|| {
            PipelineError::InvalidDefinition("DOCKHAND_HOST environment variable not set".into())
        })?;

        let port = match non_empty("DOCKHAND_SSH_PORT") {
            Some(p) => p.parse::<u16>().map_err(|_| {
                PipelineError::InvalidDefinition(format!("invalid DOCKHAND_SSH_PORT '{}'", p))
            })?,
            None => 22,
        };

        let registry = RegistryCredentials::from_lookup(&lookup)?;

        Ok(Self {
            registry,
            host: HostTarget {
                address,
                user: non_empty("DOCKHAND_SSH_USER"),
                port,
                identity: non_empty("DOCKHAND_SSH_KEY").map(PathBuf::from),
            },
        })
    }
}
