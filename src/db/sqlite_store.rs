// src/db/sqlite_store.rs
//! rusqlite-backed implementation of every store trait.
//!
//! One connection behind a mutex; each call hops onto the blocking pool and
//! is bounded by `call_timeout`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::schema_init::SchemaInitializer;
use super::{
    Bookmark, BookmarkStore, Material, MaterialFilter, MaterialSearch, MaterialStatus,
    MaterialStore, NewMaterial, NewNotification, NewUser, Notification, NotificationStore, Role,
    StoreError, StoreResult, User, UserPatch, UserStore,
};

const USER_COLUMNS: &str = "id, name, email, role, image, created_at, updated_at";
const MATERIAL_COLUMNS: &str =
    "id, title, description, class, subject, type, file_url, status, uploaded_by_id, created_at";
const NOTIFICATION_COLUMNS: &str = "id, title, message, expires_at, created_at";

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    call_timeout: Duration,
}

impl SqliteStore {
    pub fn open(path: &Path, call_timeout: Duration) -> StoreResult<Self> {
        let conn = SchemaInitializer::open(path)?;
        Ok(Self::from_connection(conn, call_timeout))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = SchemaInitializer::open_in_memory()?;
        Ok(Self::from_connection(conn, Duration::from_secs(5)))
    }

    pub fn from_connection(conn: Connection, call_timeout: Duration) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            call_timeout,
        }
    }

    async fn call<T, F>(&self, op: &'static str, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let task = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        });

        match tokio::time::timeout(self.call_timeout, task).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    debug!(op, error = %e, "store call failed");
                }
                result
            }
            Ok(Err(join_err)) => Err(StoreError::Worker(join_err.to_string())),
            Err(_) => {
                let ms = self.call_timeout.as_millis() as u64;
                warn!(op, timeout_ms = ms, "store call timed out");
                Err(StoreError::Timeout(ms))
            }
        }
    }
}

fn conflict_or(err: rusqlite::Error, what: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict(what.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: parse_col::<Role>(row, 3)?,
        image: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn material_from_row_at(row: &Row<'_>, o: usize) -> rusqlite::Result<Material> {
    Ok(Material {
        id: row.get(o)?,
        title: row.get(o + 1)?,
        description: row.get(o + 2)?,
        class: row.get(o + 3)?,
        subject: row.get(o + 4)?,
        kind: row.get(o + 5)?,
        file_url: row.get(o + 6)?,
        status: parse_col::<MaterialStatus>(row, o + 7)?,
        uploaded_by_id: row.get(o + 8)?,
        created_at: row.get(o + 9)?,
    })
}

fn material_from_row(row: &Row<'_>) -> rusqlite::Result<Material> {
    material_from_row_at(row, 0)
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        title: row.get(1)?,
        message: row.get(2)?,
        expires_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

/// `%needle%` with LIKE wildcards in the needle taken literally.
fn like_pattern(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() + 2);
    out.push('%');
    for ch in needle.to_lowercase().chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

const TEXT_MATCH: &str =
    "(LOWER(title) LIKE ? ESCAPE '\\' OR LOWER(COALESCE(description, '')) LIKE ? ESCAPE '\\')";

fn material_where(filter: &MaterialFilter) -> (String, Vec<Value>) {
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<Value> = Vec::new();

    if let Some(status) = filter.status {
        clauses.push("status = ?");
        args.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(class) = &filter.class {
        clauses.push("class = ?");
        args.push(Value::Text(class.clone()));
    }
    if let Some(subject) = &filter.subject {
        clauses.push("subject = ?");
        args.push(Value::Text(subject.clone()));
    }
    if let Some(kind) = &filter.kind {
        clauses.push("type = ?");
        args.push(Value::Text(kind.clone()));
    }
    if let Some(text) = &filter.text {
        clauses.push(TEXT_MATCH);
        let pattern = like_pattern(text);
        args.push(Value::Text(pattern.clone()));
        args.push(Value::Text(pattern));
    }

    if clauses.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), args)
    }
}

fn find_user_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![id],
        user_from_row,
    )
    .optional()
}

fn find_material_sync(conn: &Connection, id: i64) -> rusqlite::Result<Option<Material>> {
    conn.query_row(
        &format!("SELECT {} FROM materials WHERE id = ?1", MATERIAL_COLUMNS),
        params![id],
        material_from_row,
    )
    .optional()
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn find_user(&self, id: i64) -> StoreResult<Option<User>> {
        self.call("find_user", move |conn| Ok(find_user_sync(conn, id)?))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.to_string();
        self.call("find_user_by_email", move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
                    params![email],
                    user_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_users(&self, skip: u64, take: u64) -> StoreResult<Vec<User>> {
        self.call("list_users", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                USER_COLUMNS
            ))?;
            let rows = stmt.query_map(params![take as i64, skip as i64], user_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn count_users(&self) -> StoreResult<u64> {
        self.call("count_users", |conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
            Ok(n as u64)
        })
        .await
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.call("create_user", move |conn| {
            let now = Utc::now();
            let role = user.role.unwrap_or(Role::User);
            conn.execute(
                "INSERT INTO users (name, email, role, image, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![user.name, user.email, role.as_str(), user.image, now],
            )
            .map_err(|e| conflict_or(e, "email already registered"))?;
            let id = conn.last_insert_rowid();
            Ok(User {
                id,
                name: user.name,
                email: user.email,
                role,
                image: user.image,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    async fn update_user(&self, id: i64, patch: UserPatch) -> StoreResult<Option<User>> {
        self.call("update_user", move |conn| {
            let changed = conn
                .execute(
                    "UPDATE users SET name = COALESCE(?1, name), email = COALESCE(?2, email), \
                     role = COALESCE(?3, role), image = COALESCE(?4, image), updated_at = ?5 WHERE id = ?6",
                    params![
                        patch.name,
                        patch.email,
                        patch.role.map(|r| r.as_str()),
                        patch.image,
                        Utc::now(),
                        id
                    ],
                )
                .map_err(|e| conflict_or(e, "email already registered"))?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(find_user_sync(conn, id)?)
        })
        .await
    }

    async fn delete_user(&self, id: i64) -> StoreResult<bool> {
        self.call("delete_user", move |conn| {
            Ok(conn.execute("DELETE FROM users WHERE id = ?1", params![id])? > 0)
        })
        .await
    }
}

#[async_trait]
impl MaterialStore for SqliteStore {
    async fn find_material(&self, id: i64) -> StoreResult<Option<Material>> {
        self.call("find_material", move |conn| Ok(find_material_sync(conn, id)?))
            .await
    }

    async fn list_materials(
        &self,
        filter: &MaterialFilter,
        skip: u64,
        take: u64,
    ) -> StoreResult<Vec<Material>> {
        let (clause, mut args) = material_where(filter);
        self.call("list_materials", move |conn| {
            args.push(Value::Integer(take as i64));
            args.push(Value::Integer(skip as i64));
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM materials{} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
                MATERIAL_COLUMNS, clause
            ))?;
            let rows = stmt.query_map(params_from_iter(args.iter()), material_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn count_materials(&self, filter: &MaterialFilter) -> StoreResult<u64> {
        let (clause, args) = material_where(filter);
        self.call("count_materials", move |conn| {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM materials{}", clause),
                params_from_iter(args.iter()),
                |r| r.get(0),
            )?;
            Ok(n as u64)
        })
        .await
    }

    async fn create_material(&self, material: NewMaterial) -> StoreResult<Material> {
        self.call("create_material", move |conn| {
            let now = Utc::now();
            let status = MaterialStatus::Pending;
            conn.execute(
                "INSERT INTO materials (title, description, class, subject, type, file_url, status, uploaded_by_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    material.title,
                    material.description,
                    material.class,
                    material.subject,
                    material.kind,
                    material.file_url,
                    status.as_str(),
                    material.uploaded_by_id,
                    now
                ],
            )
            .map_err(|e| conflict_or(e, "uploader does not exist"))?;
            Ok(Material {
                id: conn.last_insert_rowid(),
                title: material.title,
                description: material.description,
                class: material.class,
                subject: material.subject,
                kind: material.kind,
                file_url: material.file_url,
                status,
                uploaded_by_id: material.uploaded_by_id,
                created_at: now,
            })
        })
        .await
    }

    async fn set_material_status(
        &self,
        id: i64,
        status: MaterialStatus,
    ) -> StoreResult<Option<Material>> {
        self.call("set_material_status", move |conn| {
            let changed = conn.execute(
                "UPDATE materials SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(find_material_sync(conn, id)?)
        })
        .await
    }
}

#[async_trait]
impl MaterialSearch for SqliteStore {
    async fn search_keywords(
        &self,
        keywords: &[String],
        status: MaterialStatus,
        limit: usize,
    ) -> StoreResult<Vec<Material>> {
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut args: Vec<Value> = vec![Value::Text(status.as_str().to_string())];
        let mut ors = Vec::with_capacity(keywords.len());
        for kw in keywords {
            ors.push(TEXT_MATCH);
            let pattern = like_pattern(kw);
            args.push(Value::Text(pattern.clone()));
            args.push(Value::Text(pattern));
        }
        args.push(Value::Integer(limit as i64));
        let sql = format!(
            "SELECT {} FROM materials WHERE status = ? AND ({}) ORDER BY created_at DESC, id DESC LIMIT ?",
            MATERIAL_COLUMNS,
            ors.join(" OR ")
        );

        self.call("search_keywords", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), material_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl NotificationStore for SqliteStore {
    async fn list_active(&self, now: DateTime<Utc>) -> StoreResult<Vec<Notification>> {
        self.call("list_active", move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications WHERE expires_at IS NULL OR expires_at > ?1 \
                 ORDER BY created_at DESC, id DESC",
                NOTIFICATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![now], notification_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn create_notification(
        &self,
        notification: NewNotification,
    ) -> StoreResult<Notification> {
        self.call("create_notification", move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO notifications (title, message, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![notification.title, notification.message, notification.expires_at, now],
            )?;
            Ok(Notification {
                id: conn.last_insert_rowid(),
                title: notification.title,
                message: notification.message,
                expires_at: notification.expires_at,
                created_at: now,
            })
        })
        .await
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        self.call("delete_expired", move |conn| {
            let n = conn.execute(
                "DELETE FROM notifications WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?;
            Ok(n as u64)
        })
        .await
    }
}

#[async_trait]
impl BookmarkStore for SqliteStore {
    async fn add_bookmark(&self, user_id: i64, material_id: i64) -> StoreResult<Bookmark> {
        self.call("add_bookmark", move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO bookmarks (user_id, material_id, created_at) VALUES (?1, ?2, ?3)",
                params![user_id, material_id, now],
            )
            .map_err(|e| conflict_or(e, "material already bookmarked"))?;
            let id = conn.last_insert_rowid();
            let material = find_material_sync(conn, material_id)?;
            Ok(Bookmark {
                id,
                user_id,
                material_id,
                created_at: now,
                material,
            })
        })
        .await
    }

    async fn remove_bookmark(&self, user_id: i64, material_id: i64) -> StoreResult<bool> {
        self.call("remove_bookmark", move |conn| {
            Ok(conn.execute(
                "DELETE FROM bookmarks WHERE user_id = ?1 AND material_id = ?2",
                params![user_id, material_id],
            )? > 0)
        })
        .await
    }

    async fn list_bookmarks(&self, user_id: i64) -> StoreResult<Vec<Bookmark>> {
        self.call("list_bookmarks", move |conn| {
            let sql = format!(
                "SELECT b.id, b.user_id, b.material_id, b.created_at, {} \
                 FROM bookmarks b JOIN materials m ON m.id = b.material_id \
                 WHERE b.user_id = ?1 ORDER BY b.created_at DESC, b.id DESC",
                MATERIAL_COLUMNS
                    .split(", ")
                    .map(|c| format!("m.{}", c))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok(Bookmark {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    material_id: row.get(2)?,
                    created_at: row.get(3)?,
                    material: Some(material_from_row_at(row, 4)?),
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}
