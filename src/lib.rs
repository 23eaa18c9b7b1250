pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod mailer;
pub mod monitoring;
pub mod policy;
pub mod queue;
pub mod rag;
pub mod security;
