// src/api/identity.rs
//! Caller identity, as asserted by the upstream auth layer.
//!
//! Sessions and tokens are verified before requests reach this service;
//! the verified user id and role arrive as headers.

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use std::future::{ready, Ready};

use crate::db::Role;
use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

fn header<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn caller_id(req: &HttpRequest) -> Result<i64, AppError> {
    header(req, USER_ID_HEADER)
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(AppError::unauthorized)
}

/// Any signed-in user. Missing or malformed id answers 401.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller(pub i64);

impl FromRequest for Caller {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(caller_id(req).map(Caller))
    }
}

/// A signed-in admin. Non-admins answer 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminCaller(pub i64);

impl FromRequest for AdminCaller {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = caller_id(req).and_then(|id| {
            match header(req, USER_ROLE_HEADER).and_then(|r| r.parse::<Role>().ok()) {
                Some(Role::Admin) => Ok(AdminCaller(id)),
                _ => Err(AppError::forbidden()),
            }
        });
        ready(result)
    }
}
