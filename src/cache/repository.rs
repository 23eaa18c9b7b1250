// src/cache/repository.rs
//! Cache-aside reads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CacheClient, CacheError, CacheKey};
use crate::monitoring::metrics::{CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL};
use crate::policy::OnUnavailable;

/// Where a [`CacheAside::fetch_traced`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Store,
}

#[derive(Clone)]
pub struct CacheAside {
    cache: CacheClient,
    on_unavailable: OnUnavailable,
}

impl CacheAside {
    pub fn new(cache: CacheClient) -> Self {
        Self {
            cache,
            on_unavailable: OnUnavailable::FailOpen,
        }
    }

    pub fn with_policy(cache: CacheClient, on_unavailable: OnUnavailable) -> Self {
        Self { cache, on_unavailable }
    }

    pub fn client(&self) -> &CacheClient {
        &self.cache
    }

    /// Serve `key` from the cache, or run `loader` and populate it.
    ///
    /// Loader errors propagate untouched and nothing is cached for them.
    /// Cache errors are logged and, under `FailOpen`, bypassed. Under
    /// `FailClosed` they are converted into the caller's error type.
    pub async fn fetch<T, E, F, Fut>(&self, key: &CacheKey, ttl: Duration, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.fetch_traced(key, ttl, loader).await.map(|(value, _)| value)
    }

    pub async fn fetch_traced<T, E, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        loader: F,
    ) -> Result<(T, Source), E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut cache_up = true;
        match self.cache.get::<T>(key.as_str()).await {
            Ok(Some(value)) => {
                CACHE_HITS_TOTAL.inc();
                debug!(key = %key, "cache hit");
                return Ok((value, Source::Cache));
            }
            Ok(None) => {
                CACHE_MISSES_TOTAL.inc();
                debug!(key = %key, "cache miss");
            }
            Err(CacheError::Serialization(e)) => {
                // Stale shape from an older release; reload and overwrite it.
                CACHE_MISSES_TOTAL.inc();
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
            }
            Err(e) => {
                warn!(key = %key, op = "get", error = %e, "cache unavailable, reading from store");
                if !self.on_unavailable.is_open() {
                    return Err(E::from(e));
                }
                cache_up = false;
            }
        }

        let value = loader().await?;

        if cache_up {
            if let Err(e) = self.cache.set(key.as_str(), &value, ttl).await {
                warn!(key = %key, op = "set", error = %e, "failed to populate cache");
            }
        }
        Ok((value, Source::Store))
    }

    /// Overwrite an entity key with a freshly written value. Failures are
    /// logged only; the entry then ages out via its TTL.
    pub async fn write_through<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration) {
        if let Err(e) = self.cache.set(key.as_str(), value, ttl).await {
            warn!(key = %key, op = "write_through", error = %e, "failed to refresh cache entry");
        }
    }
}
