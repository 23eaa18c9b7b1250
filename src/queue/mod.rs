// src/queue/mod.rs
//! Background job queue.
//!
//! Producers call [`JobQueue::enqueue`] and return immediately; a [`Worker`]
//! claims due jobs, runs them through a [`JobHandler`] and reports back.
//! Delivery is at-least-once: a job whose lease expires before it is
//! acknowledged is handed out again.

pub mod handlers;
pub mod job;
pub mod memory_queue;
pub mod redis_queue;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use handlers::SideEffectHandler;
pub use job::{
    CleanupJob, CleanupTarget, EmailJob, EmailType, Job, JobId, JobRecord, JobStatus,
    JobTransition,
};
pub use memory_queue::MemoryQueue;
pub use redis_queue::RedisQueue;
pub use retry::RetryPolicy;
pub use scheduler::CleanupScheduler;
pub use worker::{JobError, JobHandler, Worker, WorkerConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("queue backend error: {0}")]
    Backend(String),

    #[error("job record could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Queued or retrying, due or not.
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Validate and persist; never runs the job.
    async fn enqueue(&self, job: Job) -> QueueResult<JobId>;

    /// Hand out the most overdue job, moving it to `active` with a lease
    /// that expires after `lease`.
    async fn claim(&self, lease: Duration) -> QueueResult<Option<JobRecord>>;

    async fn complete(&self, id: &str) -> QueueResult<()>;

    /// Park the job as `retrying` until `delay` has passed.
    async fn retry_later(&self, id: &str, error: &str, delay: Duration) -> QueueResult<()>;

    async fn fail(&self, id: &str, error: &str) -> QueueResult<()>;

    async fn get(&self, id: &str) -> QueueResult<Option<JobRecord>>;

    /// Return jobs whose lease ran out to the waiting set (or fail them if
    /// no attempts remain). Returns how many were touched.
    async fn requeue_expired(&self, now: DateTime<Utc>) -> QueueResult<u64>;

    async fn stats(&self) -> QueueResult<QueueStats>;

    fn name(&self) -> &'static str;
}

pub(crate) fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// How long terminal records stay readable through [`JobQueue::get`].
pub const COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 3600);
pub const FAILED_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

pub(crate) const LEASE_EXPIRED: &str = "lease expired before acknowledgement";
