//! Core domain types
//!
//! This module contains the core domain structures used across Dockhand crates.
//! These types represent the fundamental entities of a deploy cycle and are shared
//! between the trigger server (for reporting) and the runner (for execution).

pub mod artifact;
pub mod instance;
pub mod log;
pub mod run;
