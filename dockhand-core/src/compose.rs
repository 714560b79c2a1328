//! Runtime composition descriptor
//!
//! The descriptor is a compose-style YAML file resident on the target host.
//! It names the published artifacts to run and how to run them:
//!
//! ```yaml
//! project: tutorials
//! services:
//!   mongo:
//!     image: mongo:6
//!     volumes: ["mongo_data:/data/db"]
//!   backend:
//!     image: docker.io/acme/tutorial-backend:latest
//!     ports: ["8080:8080"]
//!     depends_on: [mongo]
//! volumes:
//!   mongo_data: {}
//! ```
//!
//! Parsing validates references and resolves the start order once, so the
//! apply step only ever sees a consistent, ordered set of instances.

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::domain::artifact::ImageRef;
use crate::domain::instance::{PortMapping, RestartPolicy, RuntimeInstance, VolumeBinding};
use crate::error::{PipelineError, Result};

const DEFAULT_PROJECT: &str = "dockhand";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    #[serde(default)]
    project: Option<String>,
    #[serde(default)]
    network: Option<String>,
    services: BTreeMap<String, RawService>,
    #[serde(default)]
    volumes: BTreeMap<String, Option<serde_yaml::Value>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawService {
    image: String,
    #[serde(default)]
    ports: Vec<RawPort>,
    #[serde(default)]
    environment: Option<RawEnvironment>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    restart: Option<RestartPolicy>,
    #[serde(default)]
    volumes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u16),
    Text(String),
}

/// Compose accepts both `KEY: value` maps and `KEY=value` lists
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEnvironment {
    Map(BTreeMap<String, serde_yaml::Value>),
    List(Vec<String>),
}

/// Parsed, validated composition descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionDescriptor {
    pub project: String,
    pub network: String,
    /// Instances in dependency order: every service follows its dependencies
    pub instances: Vec<RuntimeInstance>,
    /// Declared named volumes
    pub volumes: Vec<String>,
}

impl CompositionDescriptor {
    /// Parses and validates a descriptor from YAML text
    pub fn parse(source: &str) -> Result<Self> {
        let raw: RawDescriptor = serde_yaml::from_str(source)
            .map_err(|e| PipelineError::InvalidDescriptor(e.to_string()))?;

        if raw.services.is_empty() {
            return Err(invalid("no services declared"));
        }

        let project = raw.project.unwrap_or_else(|| DEFAULT_PROJECT.to_string());
        if project.trim().is_empty() {
            return Err(invalid("project name cannot be empty"));
        }
        let network = raw
            .network
            .unwrap_or_else(|| format!("{}_default", project));

        let mut instances = HashMap::with_capacity(raw.services.len());
        let mut volume_owner: HashMap<String, String> = HashMap::new();

        for (name, service) in &raw.services {
            let instance = convert_service(name, service)?;

            for binding in &instance.volumes {
                if !raw.volumes.contains_key(&binding.volume) {
                    return Err(invalid(format!(
                        "service '{}' mounts undeclared volume '{}'",
                        name, binding.volume
                    )));
                }
                if let Some(owner) = volume_owner.insert(binding.volume.clone(), name.clone()) {
                    if owner != *name {
                        return Err(invalid(format!(
                            "volume '{}' is bound by both '{}' and '{}'",
                            binding.volume, owner, name
                        )));
                    }
                }
            }

            for dep in &instance.depends_on {
                if !raw.services.contains_key(dep) {
                    return Err(invalid(format!(
                        "service '{}' depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }

            instances.insert(name.clone(), instance);
        }

        let order = start_order(&raw.services)?;
        let instances = order
            .into_iter()
            .filter_map(|name| instances.remove(&name))
            .collect();

        Ok(Self {
            project,
            network,
            instances,
            volumes: raw.volumes.into_keys().collect(),
        })
    }

    /// Reads and parses a descriptor file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidDescriptor(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&source)
    }

    /// Service names in start order
    pub fn service_names(&self) -> Vec<&str> {
        self.instances.iter().map(|i| i.service.as_str()).collect()
    }

    pub fn instance(&self, service: &str) -> Option<&RuntimeInstance> {
        self.instances.iter().find(|i| i.service == service)
    }

    /// Every referenced image, once, in start order
    pub fn images(&self) -> Vec<ImageRef> {
        let mut images: Vec<ImageRef> = Vec::new();
        for instance in &self.instances {
            if !images.contains(&instance.image) {
                images.push(instance.image.clone());
            }
        }
        images
    }

    /// Container name used on the host for a service
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.project, service)
    }
}

fn invalid(message: impl Into<String>) -> PipelineError {
    PipelineError::InvalidDescriptor(message.into())
}

fn convert_service(name: &str, raw: &RawService) -> Result<RuntimeInstance> {
    let image = ImageRef::parse(&raw.image)
        .ok_or_else(|| invalid(format!("service '{}' has invalid image '{}'", name, raw.image)))?;

    let ports = raw
        .ports
        .iter()
        .map(|p| match p {
            RawPort::Number(n) => Some(PortMapping {
                host: *n,
                container: *n,
            }),
            RawPort::Text(s) => PortMapping::parse(s),
        })
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| invalid(format!("service '{}' has an invalid port mapping", name)))?;

    let volumes = raw
        .volumes
        .iter()
        .map(|v| {
            VolumeBinding::parse(v).ok_or_else(|| {
                invalid(format!("service '{}' has invalid volume '{}'", name, v))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let environment = match &raw.environment {
        None => BTreeMap::new(),
        Some(RawEnvironment::Map(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), yaml_scalar(v)))
            .collect(),
        Some(RawEnvironment::List(list)) => list
            .iter()
            .map(|entry| match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry.clone(), String::new()),
            })
            .collect(),
    };

    Ok(RuntimeInstance {
        service: name.to_string(),
        image,
        ports,
        restart: raw.restart.unwrap_or_default(),
        environment,
        depends_on: raw.depends_on.clone(),
        volumes,
    })
}

fn yaml_scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::Null => String::new(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::String(s) => s.clone(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Topological order over `depends_on` edges
fn start_order(services: &BTreeMap<String, RawService>) -> Result<Vec<String>> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, _> = services
        .keys()
        .map(|name| (name.as_str(), graph.add_node(name.as_str())))
        .collect();

    for (name, service) in services {
        for dep in &service.depends_on {
            if let (Some(&from), Some(&to)) = (nodes.get(dep.as_str()), nodes.get(name.as_str())) {
                graph.add_edge(from, to, ());
            }
        }
    }

    toposort(&graph, None)
        .map(|order| order.into_iter().map(|n| graph[n].to_string()).collect())
        .map_err(|cycle| {
            invalid(format!(
                "dependency cycle involving service '{}'",
                graph[cycle.node_id()]
            ))
        })
}
