//! In-process cache backend
//!
//! Same contract as the Redis backend (TTL per entry, atomic counters,
//! prefix deletes) for single-instance deployments and tests. Cached values
//! are bounded by an LRU so an unbounded key space cannot grow memory without
//! limit. Counters live in their own map outside the LRU: churn on cached
//! values must never evict a rate-limit window. Expired counters are pruned
//! as new ones arrive.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheBackend, CacheResult};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct MemoryCache {
    entries: Arc<Mutex<LruCache<String, Entry>>>,
    counters: Arc<Mutex<HashMap<String, Counter>>>,
    capacity: usize,
}

impl MemoryCache {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(cap))),
            counters: Arc::new(Mutex::new(HashMap::new())),
            capacity: cap.get(),
        }
    }

    /// Number of cached values, counters excluded.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn counter_len(&self) -> usize {
        self.counters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries eagerly; returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        drop(entries);

        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|_, c| now < c.expires_at);
        expired.len() + (before - counters.len())
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let found = entries
            .get(key)
            .map(|entry| (entry.is_expired(now), entry.value.clone()));
        match found {
            Some((false, value)) => return Ok(Some(value)),
            Some((true, _)) => {
                entries.pop(key);
            }
            None => {}
        }
        drop(entries);

        Ok(self
            .counters
            .lock()
            .get(key)
            .filter(|c| now < c.expires_at)
            .map(|c| c.count.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let value = self.entries.lock().pop(key).is_some();
        let counter = self.counters.lock().remove(key).is_some();
        Ok(value || counter)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut entries = self.entries.lock();
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        drop(entries);

        let mut counters = self.counters.lock();
        let before = counters.len();
        counters.retain(|k, _| !k.starts_with(prefix));
        Ok((doomed.len() + before - counters.len()) as u64)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<u64> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        if counters.len() >= self.capacity && !counters.contains_key(key) {
            counters.retain(|_, c| now < c.expires_at);
        }
        let counter = counters.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        if now >= counter.expires_at {
            *counter = Counter {
                count: 0,
                expires_at: now + ttl,
            };
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn ping(&self) -> CacheResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_set_get() {
        let cache = MemoryCache::new(16);
        cache.set("query1", "result".into(), Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("query1").await.unwrap().as_deref(), Some("result"));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = MemoryCache::new(16);
        assert_eq!(cache.get("nonexistent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = MemoryCache::new(16);
        cache.set("key", "value".into(), Duration::from_millis(20)).await.unwrap();
        assert!(cache.get("key").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let cache = MemoryCache::new(16);
        cache.set("short", "a".into(), Duration::from_millis(10)).await.unwrap();
        cache.set("long", "b".into(), Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_namespace() {
        let cache = MemoryCache::new(16);
        let ttl = Duration::from_secs(60);
        cache.set("materials:page:1", "a".into(), ttl).await.unwrap();
        cache.set("materials:search:x", "b".into(), ttl).await.unwrap();
        cache.set("users:page:1", "c".into(), ttl).await.unwrap();

        assert_eq!(cache.delete_prefix("materials:").await.unwrap(), 2);
        assert!(cache.get("users:page:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_incr_keeps_original_window() {
        let cache = MemoryCache::new(16);
        let window = Duration::from_millis(30);
        assert_eq!(cache.incr("rl:a", window).await.unwrap(), 1);
        assert_eq!(cache.incr("rl:a", Duration::from_secs(60)).await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(cache.incr("rl:a", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_counters_survive_value_churn() {
        let cache = MemoryCache::new(4);
        let ttl = Duration::from_secs(60);
        assert_eq!(cache.incr("rl:10.0.0.1:1", ttl).await.unwrap(), 1);

        for i in 0..16 {
            cache
                .set(&format!("materials:search:q{}", i), "[]".into(), ttl)
                .await
                .unwrap();
        }
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.incr("rl:10.0.0.1:1", ttl).await.unwrap(), 2);
        assert_eq!(cache.get("rl:10.0.0.1:1").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_expired_counters_pruned_at_capacity() {
        let cache = MemoryCache::new(2);
        let short = Duration::from_millis(10);
        cache.incr("rl:a:1", short).await.unwrap();
        cache.incr("rl:b:1", short).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        cache.incr("rl:c:1", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.counter_len(), 1);
    }

    #[tokio::test]
    async fn test_lru_bound() {
        let cache = MemoryCache::new(2);
        let ttl = Duration::from_secs(60);
        cache.set("a", "1".into(), ttl).await.unwrap();
        cache.set("b", "2".into(), ttl).await.unwrap();
        cache.set("c", "3".into(), ttl).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").await.unwrap().is_none());
    }
}
