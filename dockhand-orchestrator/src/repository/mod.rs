//! Repository Module
//!
//! Data access layer for the trigger server.

pub mod run;

pub use run::RunRepository;
