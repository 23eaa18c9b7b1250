// src/cache/keys.rs
//! Deterministic cache keys.
//!
//! A key is the resource name followed by `name:value` segments joined with
//! `:`. Query structs substitute defaults before keying, so two requests that
//! mean the same thing produce the same key, and values are escaped so no
//! parameter can smuggle in a delimiter and collide with another key.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fmt;

use crate::db::{MaterialFilter, MaterialStatus};

pub const DELIMITER: char = ':';
pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;
/// Key value for an absent optional filter.
pub const ALL: &str = "all";

pub const USERS: &str = "users";
pub const USER: &str = "user";
pub const MATERIALS: &str = "materials";
pub const NOTIFICATIONS: &str = "notifications";
pub const BOOKMARKS: &str = "bookmarks";
pub const RAG: &str = "rag";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn resource(name: &str) -> Self {
        CacheKey(name.to_string())
    }

    /// Append a bare segment (no `name:` part).
    pub fn segment(mut self, value: impl fmt::Display) -> Self {
        self.0.push(DELIMITER);
        self.0.push_str(&escape(&value.to_string()));
        self
    }

    pub fn param(mut self, name: &str, value: impl fmt::Display) -> Self {
        self.0.push(DELIMITER);
        self.0.push_str(name);
        self.0.push(DELIMITER);
        self.0.push_str(&escape(&value.to_string()));
        self
    }

    pub fn user(id: i64) -> Self {
        Self::resource(USER).segment(id)
    }

    pub fn bookmarks(user_id: i64) -> Self {
        Self::resource(BOOKMARKS).segment(user_id)
    }

    pub fn notifications() -> Self {
        Self::resource(NOTIFICATIONS)
    }

    /// Keyed on the raw prompt: rephrasings, even whitespace or case
    /// changes, are distinct entries.
    pub fn rag(prompt: &str) -> Self {
        let digest = Sha256::digest(format!("{}{}{}", RAG, DELIMITER, prompt).as_bytes());
        Self::resource(RAG).segment(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn escape(value: &str) -> Cow<'_, str> {
    if !value.contains(['%', DELIMITER]) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            DELIMITER => out.push_str("%3A"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Treat empty strings and the literal `all` as "no filter", so the key
/// sentinel and the query semantics agree.
fn normalize_filter(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case(ALL))
        .map(str::to_string)
}

/// Page/limit after defaults and clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(DEFAULT_PAGE).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page as u64 - 1) * self.limit as u64
    }

    pub fn take(&self) -> u64 {
        self.limit as u64
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(self.limit as u64)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl UserListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn cache_key(&self) -> CacheKey {
        let p = self.pagination();
        CacheKey::resource(USERS)
            .param("page", p.page)
            .param("limit", p.limit)
    }
}

/// Student listing: approved materials only.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub class: Option<String>,
    pub subject: Option<String>,
}

impl MaterialListQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn filter(&self) -> MaterialFilter {
        MaterialFilter {
            status: Some(MaterialStatus::Approved),
            class: normalize_filter(&self.class),
            subject: normalize_filter(&self.subject),
            ..Default::default()
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        let p = self.pagination();
        let f = self.filter();
        CacheKey::resource(MATERIALS)
            .param("page", p.page)
            .param("limit", p.limit)
            .param("class", f.class.as_deref().unwrap_or(ALL))
            .param("subject", f.subject.as_deref().unwrap_or(ALL))
    }
}

/// Admin listing: any status, approved by default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminMaterialQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub class: Option<String>,
    pub subject: Option<String>,
    pub status: Option<MaterialStatus>,
}

impl AdminMaterialQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn filter(&self) -> MaterialFilter {
        MaterialFilter {
            status: Some(self.status.unwrap_or_default()),
            class: normalize_filter(&self.class),
            subject: normalize_filter(&self.subject),
            ..Default::default()
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        let p = self.pagination();
        let f = self.filter();
        CacheKey::resource(MATERIALS)
            .param("page", p.page)
            .param("limit", p.limit)
            .param("class", f.class.as_deref().unwrap_or(ALL))
            .param("subject", f.subject.as_deref().unwrap_or(ALL))
            .param("status", f.status.unwrap_or_default())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialSearchQuery {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl MaterialSearchQuery {
    /// Trimmed search text, `None` when blank.
    pub fn text(&self) -> Option<&str> {
        self.q.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn filter(&self) -> MaterialFilter {
        MaterialFilter {
            status: Some(MaterialStatus::Approved),
            text: self.text().map(str::to_string),
            ..Default::default()
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        let p = self.pagination();
        CacheKey::resource(MATERIALS)
            .param("search", self.text().unwrap_or_default())
            .param("page", p.page)
            .param("limit", p.limit)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MaterialFilterQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub class: Option<String>,
    pub subject: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl MaterialFilterQuery {
    pub fn pagination(&self) -> Pagination {
        Pagination::new(self.page, self.limit)
    }

    pub fn filter(&self) -> MaterialFilter {
        MaterialFilter {
            status: Some(MaterialStatus::Approved),
            kind: normalize_filter(&self.kind),
            class: normalize_filter(&self.class),
            subject: normalize_filter(&self.subject),
            text: None,
        }
    }

    pub fn has_any_filter(&self) -> bool {
        let f = self.filter();
        f.kind.is_some() || f.class.is_some() || f.subject.is_some()
    }

    pub fn cache_key(&self) -> CacheKey {
        let p = self.pagination();
        let f = self.filter();
        CacheKey::resource(MATERIALS)
            .segment("filter")
            .param("type", f.kind.as_deref().unwrap_or(ALL))
            .param("class", f.class.as_deref().unwrap_or(ALL))
            .param("subject", f.subject.as_deref().unwrap_or(ALL))
            .param("page", p.page)
            .param("limit", p.limit)
    }
}
