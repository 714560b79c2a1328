//! Service Module
//!
//! Business logic layer for the trigger server.

pub mod run;

// Re-export for convenience
pub use run as run_service;
