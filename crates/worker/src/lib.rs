//! Worker service assembly: configuration, token validation, and the
//! built-in maintenance job handler. The binary in `main.rs` wires these
//! onto the queue dispatcher and cache store.

pub mod auth;
pub mod config;
pub mod jobs;
