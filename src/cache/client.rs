// src/cache/client.rs
//! Typed cache client: JSON over a [`CacheBackend`] with a bounded timeout on
//! every call.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{CacheBackend, CacheError, CacheResult};
use crate::monitoring::metrics;

#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    op_timeout: Duration,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>, op_timeout: Duration) -> Self {
        Self { backend, op_timeout }
    }

    pub fn backend(&self) -> &Arc<dyn CacheBackend> {
        &self.backend
    }

    pub fn op_timeout(&self) -> Duration {
        self.op_timeout
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let result = match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                op,
                after_ms: self.op_timeout.as_millis() as u64,
            }),
        };
        if result.is_err() {
            metrics::CACHE_ERRORS_TOTAL.with_label_values(&[op]).inc();
        }
        result
    }

    pub async fn get_raw(&self, key: &str) -> CacheResult<Option<String>> {
        self.bounded("get", self.backend.get(key)).await
    }

    pub async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        self.bounded("set", self.backend.set(key, value, ttl)).await
    }

    /// Fetch and decode. A present-but-undecodable value is an error, not a
    /// miss; callers decide what to do with it.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        self.set_raw(key, json, ttl).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.bounded("delete", self.backend.delete(key)).await
    }

    pub async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.bounded("delete_prefix", self.backend.delete_prefix(prefix)).await
    }

    pub async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<u64> {
        self.bounded("incr", self.backend.incr(key, ttl)).await
    }

    pub async fn ping(&self) -> CacheResult<()> {
        self.bounded("ping", self.backend.ping()).await
    }
}
