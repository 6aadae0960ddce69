//! Backend implementations of [`CacheBackend`](crate::backend::CacheBackend).

pub mod memory;
pub mod redis;
