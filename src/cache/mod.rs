// src/cache/mod.rs
//! Read-path caching layer.
//!
//! ```text
//! handler ──> CacheAside ──> CacheClient ──> CacheBackend (Redis | Memory)
//!    │                                            ^
//!    └─ write ─> store ─> InvalidationCoordinator ┘
//! ```
//!
//! The store is always the source of truth; anything in here may vanish at
//! any time and the next read rebuilds it.

pub mod client;
pub mod invalidation;
pub mod keys;
pub mod memory_cache;
pub mod redis_cache;
pub mod repository;

pub use client::CacheClient;
pub use invalidation::{InvalidationCoordinator, InvalidationReport, Resource, Scope};
pub use keys::CacheKey;
pub use memory_cache::MemoryCache;
pub use redis_cache::RedisCache;
pub use repository::CacheAside;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },

    #[error("cache value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Unavailable(err.to_string())
    }
}

/// Raw key-value operations shared by the cache and the rate-limit counters.
///
/// Values are opaque strings; typing lives in [`CacheClient`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Returns true when a key was actually removed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Atomically increment a counter. `ttl` is applied only when the
    /// increment created the key, so the window never slides.
    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<u64>;

    async fn ping(&self) -> CacheResult<()>;

    fn name(&self) -> &'static str;
}
