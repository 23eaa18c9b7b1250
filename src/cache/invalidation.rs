// src/cache/invalidation.rs

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{debug, error};

use super::keys::{BOOKMARKS, DELIMITER, MATERIALS, NOTIFICATIONS, RAG, USER, USERS};
use super::{CacheClient, CacheKey};
use crate::db::StoreError;
use crate::monitoring::metrics::{INVALIDATIONS_TOTAL, INVALIDATION_FAILURES_TOTAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Users,
    Materials,
    Notifications,
    Bookmarks,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Users,
        Resource::Materials,
        Resource::Notifications,
        Resource::Bookmarks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Resource::Users => USERS,
            Resource::Materials => MATERIALS,
            Resource::Notifications => NOTIFICATIONS,
            Resource::Bookmarks => BOOKMARKS,
        }
    }

    /// Prefix covering every parameterised listing key, if the resource has
    /// listings. Listings can't be enumerated, so they are dropped wholesale.
    fn listing_prefix(&self) -> Option<String> {
        match self {
            Resource::Users => Some(format!("{}{}", USERS, DELIMITER)),
            Resource::Materials => Some(format!("{}{}", MATERIALS, DELIMITER)),
            Resource::Notifications | Resource::Bookmarks => None,
        }
    }

    /// Prefix covering every per-entity key.
    fn entity_prefix(&self) -> String {
        match self {
            Resource::Users => format!("{}{}", USER, DELIMITER),
            other => format!("{}{}", other.name(), DELIMITER),
        }
    }

    fn entity_key(&self, id: i64) -> CacheKey {
        match self {
            Resource::Users => CacheKey::user(id),
            Resource::Bookmarks => CacheKey::bookmarks(id),
            other => CacheKey::resource(other.name()).segment(id),
        }
    }

    fn singleton_key(&self) -> Option<CacheKey> {
        match self {
            Resource::Notifications => Some(CacheKey::notifications()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Everything the resource owns: listings, entities, singleton.
    All,
    /// Listing keys (and the singleton) only, e.g. after a create.
    Listings,
    /// One entity, plus every listing that may have contained it.
    Entity(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InvalidationReport {
    pub keys_deleted: u64,
    /// Operations that failed; entries they covered stay until their TTL.
    pub failures: u32,
}

impl InvalidationReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// A failed write whose effect on the store is unknown.
pub trait WriteOutcome {
    /// True when the write may still have committed, e.g. it timed out
    /// while the statement kept running.
    fn may_have_committed(&self) -> bool;
}

impl WriteOutcome for StoreError {
    fn may_have_committed(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

/// Deletes cache entries made stale by a mutation. Never fails the caller.
#[derive(Clone)]
pub struct InvalidationCoordinator {
    cache: CacheClient,
}

impl InvalidationCoordinator {
    pub fn new(cache: CacheClient) -> Self {
        Self { cache }
    }

    pub async fn invalidate(&self, resource: Resource, scope: Scope) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        let label = resource.name();

        if let Scope::Entity(id) = scope {
            let key = resource.entity_key(id);
            self.delete_key(label, &key, &mut report).await;
        }

        if let Some(key) = resource.singleton_key() {
            self.delete_key(label, &key, &mut report).await;
        }

        if let Some(prefix) = resource.listing_prefix() {
            self.delete_prefix(label, &prefix, &mut report).await;
        }

        if scope == Scope::All {
            self.delete_prefix(label, &resource.entity_prefix(), &mut report)
                .await;
        }

        INVALIDATIONS_TOTAL
            .with_label_values(&[resource.name()])
            .inc();
        debug!(
            resource = resource.name(),
            scope = ?scope,
            keys_deleted = report.keys_deleted,
            failures = report.failures,
            "cache invalidated"
        );
        report
    }

    /// Drop every key the cache namespaces own. Rate-limit counters and
    /// anything else sharing the backend are left alone.
    pub async fn clear_all(&self) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        for resource in Resource::ALL {
            let part = self.invalidate(resource, Scope::All).await;
            report.keys_deleted += part.keys_deleted;
            report.failures += part.failures;
        }
        let rag_prefix = format!("{}{}", RAG, DELIMITER);
        self.delete_prefix(RAG, &rag_prefix, &mut report).await;
        report
    }

    /// Run a store write, then invalidate, and only if the write succeeded
    /// or may have landed anyway.
    ///
    /// Invalidating first would let a concurrent read re-cache the old row
    /// before the write lands.
    pub async fn mutate_then_invalidate<T, E, Fut>(
        &self,
        resource: Resource,
        scope: Scope,
        write: Fut,
    ) -> Result<T, E>
    where
        E: WriteOutcome,
        Fut: Future<Output = Result<T, E>>,
    {
        match write.await {
            Ok(value) => {
                self.invalidate(resource, scope).await;
                Ok(value)
            }
            Err(e) => {
                if e.may_have_committed() {
                    self.invalidate(resource, scope).await;
                }
                Err(e)
            }
        }
    }

    async fn delete_key(&self, label: &'static str, key: &CacheKey, report: &mut InvalidationReport) {
        match self.cache.delete(key.as_str()).await {
            Ok(true) => report.keys_deleted += 1,
            Ok(false) => {}
            Err(e) => {
                report.failures += 1;
                INVALIDATION_FAILURES_TOTAL
                    .with_label_values(&[label])
                    .inc();
                error!(
                    resource = label,
                    key = %key,
                    op = "delete",
                    error = %e,
                    "cache invalidation failed; stale data possible until TTL expiry"
                );
            }
        }
    }

    async fn delete_prefix(&self, label: &'static str, prefix: &str, report: &mut InvalidationReport) {
        match self.cache.delete_prefix(prefix).await {
            Ok(n) => report.keys_deleted += n,
            Err(e) => {
                report.failures += 1;
                INVALIDATION_FAILURES_TOTAL
                    .with_label_values(&[label])
                    .inc();
                error!(
                    resource = label,
                    prefix = %prefix,
                    op = "delete_prefix",
                    error = %e,
                    "cache invalidation failed; stale data possible until TTL expiry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::keys::{MaterialListQuery, MaterialSearchQuery, UserListQuery};
    use crate::cache::MemoryCache;
    use std::sync::Arc;
    use std::time::Duration;

    async fn seeded() -> (CacheClient, InvalidationCoordinator) {
        let client = CacheClient::new(Arc::new(MemoryCache::new(64)), Duration::from_secs(1));
        let ttl = Duration::from_secs(300);
        for key in [
            MaterialListQuery::default().cache_key(),
            MaterialSearchQuery { q: Some("algebra".into()), ..Default::default() }.cache_key(),
            UserListQuery::default().cache_key(),
            CacheKey::user(1),
            CacheKey::user(2),
            CacheKey::notifications(),
            CacheKey::rag("hello"),
        ] {
            client.set(key.as_str(), &1u8, ttl).await.unwrap();
        }
        let coordinator = InvalidationCoordinator::new(client.clone());
        (client, coordinator)
    }

    async fn present(client: &CacheClient, key: CacheKey) -> bool {
        client.get_raw(key.as_str()).await.unwrap().is_some()
    }

    #[tokio::test]
    async fn test_material_listings_dropped_others_kept() {
        let (client, coordinator) = seeded().await;
        let report = coordinator.invalidate(Resource::Materials, Scope::Listings).await;
        assert_eq!(report.keys_deleted, 2);
        assert!(report.is_clean());

        assert!(!present(&client, MaterialListQuery::default().cache_key()).await);
        assert!(present(&client, UserListQuery::default().cache_key()).await);
        assert!(present(&client, CacheKey::rag("hello")).await);
    }

    #[tokio::test]
    async fn test_user_entity_scope_is_precise_for_entities() {
        let (client, coordinator) = seeded().await;
        coordinator.invalidate(Resource::Users, Scope::Entity(1)).await;

        assert!(!present(&client, CacheKey::user(1)).await);
        assert!(present(&client, CacheKey::user(2)).await);
        assert!(!present(&client, UserListQuery::default().cache_key()).await);
    }

    #[tokio::test]
    async fn test_scope_all_drops_entities_too() {
        let (client, coordinator) = seeded().await;
        coordinator.invalidate(Resource::Users, Scope::All).await;
        assert!(!present(&client, CacheKey::user(1)).await);
        assert!(!present(&client, CacheKey::user(2)).await);
    }

    #[tokio::test]
    async fn test_notifications_singleton() {
        let (client, coordinator) = seeded().await;
        let report = coordinator.invalidate(Resource::Notifications, Scope::Listings).await;
        assert_eq!(report.keys_deleted, 1);
        assert!(!present(&client, CacheKey::notifications()).await);
    }

    #[tokio::test]
    async fn test_failed_write_skips_invalidation() {
        let (client, coordinator) = seeded().await;
        let res: Result<(), StoreError> = coordinator
            .mutate_then_invalidate(Resource::Materials, Scope::Listings, async {
                Err(StoreError::Conflict("material".into()))
            })
            .await;
        assert!(res.is_err());
        assert!(present(&client, MaterialListQuery::default().cache_key()).await);
    }

    #[tokio::test]
    async fn test_timed_out_write_still_invalidates() {
        let (client, coordinator) = seeded().await;
        let res: Result<(), StoreError> = coordinator
            .mutate_then_invalidate(Resource::Users, Scope::Entity(1), async {
                Err(StoreError::Timeout(5_000))
            })
            .await;
        assert!(matches!(res, Err(StoreError::Timeout(5_000))));
        assert!(!present(&client, CacheKey::user(1)).await);
        assert!(!present(&client, UserListQuery::default().cache_key()).await);
    }

    #[tokio::test]
    async fn test_clear_all_keeps_foreign_keys() {
        let (client, coordinator) = seeded().await;
        let ttl = Duration::from_secs(300);
        client.set(CacheKey::bookmarks(3).as_str(), &1u8, ttl).await.unwrap();
        client.incr("rl:198.51.100.7:1700000000", ttl).await.unwrap();
        client.set_raw("zanly:jobs:job:abc", "{}".into(), ttl).await.unwrap();

        let report = coordinator.clear_all().await;
        assert!(report.is_clean());
        assert_eq!(report.keys_deleted, 8);

        for key in [
            MaterialListQuery::default().cache_key(),
            UserListQuery::default().cache_key(),
            CacheKey::user(2),
            CacheKey::notifications(),
            CacheKey::bookmarks(3),
            CacheKey::rag("hello"),
        ] {
            assert!(!present(&client, key).await);
        }
        assert_eq!(client.incr("rl:198.51.100.7:1700000000", ttl).await.unwrap(), 2);
        assert!(client.get_raw("zanly:jobs:job:abc").await.unwrap().is_some());
    }
}
