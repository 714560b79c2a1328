//! Data Transfer Objects for the trigger server API
//!
//! DTOs are lightweight representations of domain entities optimized for
//! network transfer between the trigger server and its clients.

pub mod run;
