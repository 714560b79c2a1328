//! Runtime instance domain types
//!
//! A runtime instance is one running container on the target host. Instances
//! are described by the composition descriptor and created or recreated by
//! the apply step.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::artifact::ImageRef;

/// Restart policy handed to the container engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    No,
    Always,
    OnFailure,
    #[default]
    UnlessStopped,
}

impl RestartPolicy {
    /// Value for the engine's `--restart` flag
    pub fn as_flag(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::Always => "always",
            RestartPolicy::OnFailure => "on-failure",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Host port to container port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    /// Parses `host:container`; a bare port maps to itself
    pub fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        match spec.split_once(':') {
            Some((host, container)) => Some(Self {
                host: host.trim().parse().ok()?,
                container: container.trim().parse().ok()?,
            }),
            None => {
                let port = spec.parse().ok()?;
                Some(Self {
                    host: port,
                    container: port,
                })
            }
        }
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.container)
    }
}

/// Named volume mounted into a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VolumeBinding {
    pub volume: String,
    pub target: String,
}

impl VolumeBinding {
    /// Parses `name:/path`
    pub fn parse(spec: &str) -> Option<Self> {
        let (volume, target) = spec.trim().split_once(':')?;
        if volume.is_empty() || !target.starts_with('/') {
            return None;
        }
        Some(Self {
            volume: volume.to_string(),
            target: target.to_string(),
        })
    }
}

impl std::fmt::Display for VolumeBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.volume, self.target)
    }
}

/// Desired state of one runtime instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInstance {
    /// Service name, also used as the container name suffix
    pub service: String,
    pub image: ImageRef,
    pub ports: Vec<PortMapping>,
    pub restart: RestartPolicy,
    pub environment: BTreeMap<String, String>,
    pub depends_on: Vec<String>,
    pub volumes: Vec<VolumeBinding>,
}

impl RuntimeInstance {
    /// Whether the instance owns persistent storage
    pub fn is_stateful(&self) -> bool {
        !self.volumes.is_empty()
    }

    /// Fingerprint of the declared configuration (everything except dependencies)
    ///
    /// Stamped on the container as a label so the apply step can tell when
    /// the declared configuration changed even though the image id did not.
    pub fn config_fingerprint(&self) -> String {
        let canonical = serde_json::to_vec(&(
            &self.image,
            &self.ports,
            &self.restart,
            &self.environment,
            &self.volumes,
        ))
        .unwrap_or_default();

        blake3::hash(&canonical).to_hex()[..16].to_string()
    }
}

/// What one apply pass did on the host
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    /// References pulled before any instance was touched
    pub pulled: Vec<ImageRef>,
    /// Services stopped and recreated, in the order they were recreated
    pub recreated: Vec<String>,
    /// Services whose up-to-date container was stopped and got started again
    #[serde(default)]
    pub restarted: Vec<String>,
    /// Services left running because nothing changed
    pub unchanged: Vec<String>,
}

impl ApplyReport {
    /// True when no instance was started or restarted
    pub fn is_noop(&self) -> bool {
        self.recreated.is_empty() && self.restarted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance() -> RuntimeInstance {
        RuntimeInstance {
            service: "backend".to_string(),
            image: ImageRef::new("acme/backend", "latest"),
            ports: vec![PortMapping {
                host: 8080,
                container: 8080,
            }],
            restart: RestartPolicy::UnlessStopped,
            environment: BTreeMap::new(),
            depends_on: vec!["mongo".to_string()],
            volumes: vec![],
        }
    }

    #[test]
    fn test_parse_port_mapping() {
        assert_eq!(
            PortMapping::parse("8081:80"),
            Some(PortMapping {
                host: 8081,
                container: 80
            })
        );
        assert_eq!(
            PortMapping::parse("27017"),
            Some(PortMapping {
                host: 27017,
                container: 27017
            })
        );
        assert!(PortMapping::parse("http:80").is_none());
        assert!(PortMapping::parse("70000:80").is_none());
    }

    #[test]
    fn test_parse_volume_binding() {
        let v = VolumeBinding::parse("mongo_data:/data/db").unwrap();
        assert_eq!(v.volume, "mongo_data");
        assert_eq!(v.target, "/data/db");
        assert!(VolumeBinding::parse("mongo_data:data").is_none());
        assert!(VolumeBinding::parse("/data/db").is_none());
    }

    #[test]
    fn test_restart_policy_flag() {
        assert_eq!(RestartPolicy::default().as_flag(), "unless-stopped");
        assert_eq!(RestartPolicy::OnFailure.as_flag(), "on-failure");
    }

    #[test]
    fn test_fingerprint_is_short_hex_digest() {
        let fingerprint = instance().config_fingerprint();
        assert_eq!(fingerprint.len(), 16);
        assert!(fingerprint.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fingerprint, instance().config_fingerprint());
    }

    #[test]
    fn test_fingerprint_ignores_dependencies() {
        let a = instance();
        let mut b = instance();
        b.depends_on.clear();
        assert_eq!(a.config_fingerprint(), b.config_fingerprint());
    }

    #[test]
    fn test_fingerprint_tracks_ports_and_env() {
        let a = instance();

        let mut b = instance();
        b.ports[0].host = 9090;
        assert_ne!(a.config_fingerprint(), b.config_fingerprint());

        let mut c = instance();
        c.environment
            .insert("MONGO_URL".to_string(), "mongodb://mongo".to_string());
        assert_ne!(a.config_fingerprint(), c.config_fingerprint());
    }
}
