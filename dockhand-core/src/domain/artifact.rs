//! Artifact domain types
//!
//! An artifact is the immutable output of one image build. Tags are mutable
//! pointers that the registry moves from one artifact to the next.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tag used when a reference does not name one
pub const DEFAULT_TAG: &str = "latest";

/// A `name[:tag]` image reference
///
/// The name may include a registry host with a port (`localhost:5000/app`),
/// so the tag separator is only recognised after the last `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub name: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(name: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tag: tag.into(),
        }
    }

    /// Parses a reference, defaulting the tag to `latest`
    ///
    /// Returns `None` for empty names or empty tags (`app:`).
    pub fn parse(reference: &str) -> Option<Self> {
        let reference = reference.trim();
        let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);

        let (name, tag) = match reference[name_start..].rfind(':') {
            Some(pos) => {
                let split = name_start + pos;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, DEFAULT_TAG),
        };

        if name.is_empty() || tag.is_empty() || name.ends_with('/') {
            return None;
        }

        Some(Self::new(name, tag))
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.tag)
    }
}

/// Immutable build output for one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Service the artifact was built for (e.g. "backend")
    pub service: String,

    /// Fully-qualified repository the artifact is published to
    pub repository: String,

    /// Content id reported by the engine after the build (`sha256:...`)
    pub id: String,

    /// Tags the artifact has been published under so far
    pub tags: Vec<String>,

    /// Build context directory
    pub context: PathBuf,
}

impl Artifact {
    /// Reference to this artifact under one of its tags
    pub fn reference(&self, tag: &str) -> ImageRef {
        ImageRef::new(self.repository.clone(), tag)
    }

    /// Short form of the content id for display
    pub fn short_id(&self) -> &str {
        let id = self.id.strip_prefix("sha256:").unwrap_or(&self.id);
        &id[..id.len().min(12)]
    }
}
