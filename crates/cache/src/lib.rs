//! Cache layer: a TTL-capable key/value store with environment namespacing,
//! pluggable backends, and an in-flight call coalescer.
//!
//! [`store::CacheStore`] is the serialization/namespacing front over a
//! [`backend::CacheBackend`] (Redis in production, in-memory otherwise).
//! [`coalesce::Coalescer`] wraps expensive async operations so concurrent
//! callers for the same key share one execution and one cached result.

pub mod backend;
pub mod backends;
pub mod coalesce;
pub mod store;

pub use backend::{CacheBackend, CacheError};
pub use backends::memory::MemoryBackend;
pub use backends::redis::RedisBackend;
pub use coalesce::{CoalesceError, Coalescer};
pub use store::CacheStore;
