//! Shared foundation for the relay workspace.
//!
//! Holds the types every other crate agrees on: id/timestamp aliases,
//! well-known constant values, and the per-request [`context::RequestContext`].
//! This crate has no internal dependencies so it can sit below everything.

pub mod constants;
pub mod context;
pub mod types;
