//! Dockhand Core
//!
//! Core types and abstractions for the Dockhand build/publish/deploy pipeline.
//!
//! This crate contains:
//! - Domain types: Artifacts, runtime instances, pipeline runs, logs
//! - Composition descriptor parsing and dependency ordering
//! - Pipeline definition (`dockhand.toml`) and out-of-band secrets
//! - The pipeline error taxonomy
//! - DTOs: Data transfer objects for the trigger server API

pub mod compose;
pub mod definition;
pub mod domain;
pub mod dto;
pub mod error;
