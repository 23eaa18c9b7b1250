//! Relational store contract
//!
//! The caching, queue and RAG layers only see these traits; `SqliteStore` is
//! the bundled implementation. All reads are idempotent and safe to retry.

pub mod models;
pub mod schema_init;
pub mod sqlite_store;

pub use models::{
    Bookmark, Material, MaterialFilter, MaterialStatus, NewMaterial, NewNotification, NewUser,
    Notification, Role, User, UserPatch,
};
pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database call timed out after {0}ms")]
    Timeout(u64),

    #[error("duplicate record: {0}")]
    Conflict(String),

    #[error("database worker failed: {0}")]
    Worker(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    /// Newest first.
    async fn list_users(&self, skip: u64, take: u64) -> StoreResult<Vec<User>>;
    async fn count_users(&self) -> StoreResult<u64>;
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    async fn update_user(&self, id: i64, patch: UserPatch) -> StoreResult<Option<User>>;
    async fn delete_user(&self, id: i64) -> StoreResult<bool>;
}

#[async_trait]
pub trait MaterialStore: Send + Sync {
    async fn find_material(&self, id: i64) -> StoreResult<Option<Material>>;
    /// Newest first.
    async fn list_materials(
        &self,
        filter: &MaterialFilter,
        skip: u64,
        take: u64,
    ) -> StoreResult<Vec<Material>>;
    async fn count_materials(&self, filter: &MaterialFilter) -> StoreResult<u64>;
    async fn create_material(&self, material: NewMaterial) -> StoreResult<Material>;
    async fn set_material_status(
        &self,
        id: i64,
        status: MaterialStatus,
    ) -> StoreResult<Option<Material>>;
}

/// Read-only keyword search used to ground generated answers.
#[async_trait]
pub trait MaterialSearch: Send + Sync {
    /// Up to `limit` most recent materials with `status` whose title or
    /// description contains any keyword, case-insensitively.
    async fn search_keywords(
        &self,
        keywords: &[String],
        status: MaterialStatus,
        limit: usize,
    ) -> StoreResult<Vec<Material>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn list_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<Notification>>;
    async fn create_notification(&self, notification: NewNotification)
        -> StoreResult<Notification>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

#[async_trait]
pub trait BookmarkStore: Send + Sync {
    async fn add_bookmark(&self, user_id: i64, material_id: i64) -> StoreResult<Bookmark>;
    async fn remove_bookmark(&self, user_id: i64, material_id: i64) -> StoreResult<bool>;
    async fn list_bookmarks(&self, user_id: i64) -> StoreResult<Vec<Bookmark>>;
}
