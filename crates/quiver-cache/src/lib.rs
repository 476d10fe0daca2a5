//! # quiver-cache
//!
//! Versioned cache layer for the quiver pipeline.
//!
//! This crate provides:
//! - [`CacheLayer`]: get-or-compute with single-flight and fail-open semantics
//! - [`RedisBackend`]: shared Redis store used in production
//! - [`MemoryBackend`]: in-process store for Redis-less runs and tests
//! - [`keys`]: namespaced, versioned key builders

pub mod keys;
mod layer;
mod memory;
mod redis_backend;

pub use layer::{CacheLayer, CacheStats};
pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;
