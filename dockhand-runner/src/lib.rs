//! Dockhand Runner
//!
//! The pipeline engine: builds service images, publishes them to the
//! registry and applies the composition descriptor on the target host.
//!
//! Architecture:
//! - Engine: local container engine CLI wrapper
//! - Builder / Registry: the build and publish components
//! - Remote: sessions on the target host and the apply step
//! - Pipeline: the run state machine and the run lock
//! - Reporter: where run snapshots and log lines go

pub mod builder;
pub mod engine;
pub mod pipeline;
pub mod registry;
pub mod remote;
pub mod reporter;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use builder::{EngineBuilder, ImageBuilder};
pub use engine::ContainerEngine;
pub use pipeline::Pipeline;
pub use registry::{ArtifactRegistry, EngineRegistry};
pub use remote::{RemoteExecutor, RemoteSession, StandardRemoteExecutor};
pub use reporter::{InMemoryReporter, RunReporter};
