// src/cache/redis_cache.rs - Redis-backed cache and counter store

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info};

use super::{CacheBackend, CacheError, CacheResult};

/// Keys are removed in batches of this size during prefix deletes.
const SCAN_BATCH: usize = 500;

const INCR_WITH_EXPIRY: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// Distributed cache on a shared Redis instance.
///
/// The connection is opened on first use and then kept alive by the
/// `ConnectionManager`, which reconnects on its own. A Redis that is down at
/// boot therefore only degrades the calls made while it is down.
#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
    manager: std::sync::Arc<OnceCell<ConnectionManager>>,
    connect_timeout: Duration,
}

impl RedisCache {
    pub fn new(redis_url: &str, connect_timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url).map_err(|e| {
            error!(error = %e, "Invalid Redis URL");
            CacheError::from(e)
        })?;
        Ok(Self {
            client,
            manager: std::sync::Arc::new(OnceCell::new()),
            connect_timeout,
        })
    }

    async fn conn(&self) -> CacheResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.connect_timeout, connect).await {
                    Ok(Ok(manager)) => {
                        info!("Redis cache connected");
                        Ok(manager)
                    }
                    Ok(Err(e)) => Err(CacheError::from(e)),
                    Err(_) => Err(CacheError::Timeout {
                        op: "connect",
                        after_ms: self.connect_timeout.as_millis() as u64,
                    }),
                }
            })
            .await?;
        Ok(manager.clone())
    }
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 2);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let secs = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", glob_escape(prefix));
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let n: i64 = conn.del(keys).await?;
                removed += n.max(0) as u64;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(removed)
    }

    async fn incr(&self, key: &str, ttl: Duration) -> CacheResult<u64> {
        let mut conn = self.conn().await?;
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let count: u64 = Script::new(INCR_WITH_EXPIRY)
            .key(key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;
        Ok(count)
    }

    async fn ping(&self) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("materials:"), "materials:");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(RedisCache::new("not-a-url", Duration::from_millis(10)).is_err());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_set_get_delete() {
        let cache = RedisCache::new("redis://127.0.0.1:6379/", Duration::from_secs(1)).unwrap();
        cache.set("zanly:test:key", "v".into(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("zanly:test:key").await.unwrap().as_deref(), Some("v"));
        assert!(cache.delete("zanly:test:key").await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_prefix_delete_and_incr() {
        let cache = RedisCache::new("redis://127.0.0.1:6379/", Duration::from_secs(1)).unwrap();
        for i in 0..3 {
            cache
                .set(&format!("zanly:test:p:{}", i), "x".into(), Duration::from_secs(5))
                .await
                .unwrap();
        }
        assert_eq!(cache.delete_prefix("zanly:test:p:").await.unwrap(), 3);

        cache.delete("zanly:test:ctr").await.unwrap();
        assert_eq!(cache.incr("zanly:test:ctr", Duration::from_secs(5)).await.unwrap(), 1);
        assert_eq!(cache.incr("zanly:test:ctr", Duration::from_secs(5)).await.unwrap(), 2);
    }
}
