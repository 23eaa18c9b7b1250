// src/queue/redis_queue.rs - Redis-backed durable job queue
//
// Layout under `<ns>`:
//   <ns>:job:<id>   JSON JobRecord
//   <ns>:waiting    ZSET id -> run_at (ms)
//   <ns>:active     ZSET id -> lease deadline (ms)
//   <ns>:failed     LIST of recently failed ids (bounded)
//   <ns>:stats      HASH completed / failed totals

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use super::{
    chrono_delay, Job, JobId, JobQueue, JobRecord, JobStatus, QueueError, QueueResult, QueueStats,
    COMPLETED_RETENTION, FAILED_RETENTION, LEASE_EXPIRED,
};
use crate::monitoring::metrics::{JOBS_ENQUEUED_TOTAL, JOBS_FAILED_TOTAL};

/// Atomically move the most overdue waiting id into the active set.
const CLAIM_DUE: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
if #due == 0 then
  return false
end
redis.call('ZREM', KEYS[1], due[1])
redis.call('ZADD', KEYS[2], ARGV[2], due[1])
return due[1]
"#;

const FAILED_LIST_MAX: isize = 1000;

#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    pub redis_url: String,
    pub namespace: String,
    pub max_attempts: u32,
    pub connect_timeout: Duration,
}

#[derive(Clone)]
pub struct RedisQueue {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
    config: RedisQueueConfig,
}

impl RedisQueue {
    pub fn new(config: RedisQueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            manager: Arc::new(OnceCell::new()),
            config,
        })
    }

    async fn conn(&self) -> QueueResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new(self.client.clone());
                match tokio::time::timeout(self.config.connect_timeout, connect).await {
                    Ok(Ok(manager)) => {
                        info!(namespace = %self.config.namespace, "Redis job queue connected");
                        Ok(manager)
                    }
                    Ok(Err(e)) => Err(QueueError::from(e)),
                    Err(_) => Err(QueueError::Backend(format!(
                        "connect timed out after {}ms",
                        self.config.connect_timeout.as_millis()
                    ))),
                }
            })
            .await?;
        Ok(manager.clone())
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.config.namespace, suffix)
    }

    fn job_key(&self, id: &str) -> String {
        format!("{}:job:{}", self.config.namespace, id)
    }

    async fn load(&self, conn: &mut ConnectionManager, id: &str) -> QueueResult<JobRecord> {
        let raw: Option<String> = conn.get(self.job_key(id)).await?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(QueueError::NotFound(id.to_string())),
        }
    }

    async fn mark_failed(
        &self,
        conn: &mut ConnectionManager,
        mut record: JobRecord,
        error: &str,
        now: DateTime<Utc>,
    ) -> QueueResult<()> {
        record.transition(JobStatus::Failed, now, Some(error.to_string()))?;
        let json = serde_json::to_string(&record)?;
        redis::pipe()
            .atomic()
            .set_ex(self.job_key(&record.id), json, FAILED_RETENTION.as_secs())
            .ignore()
            .zrem(self.key("active"), &record.id)
            .ignore()
            .lpush(self.key("failed"), &record.id)
            .ignore()
            .ltrim(self.key("failed"), 0, FAILED_LIST_MAX - 1)
            .ignore()
            .hincr(self.key("stats"), "failed", 1)
            .ignore()
            .query_async::<()>(conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        job.validate()?;
        let kind = job.kind();
        let record = JobRecord::new(job, self.config.max_attempts, Utc::now());
        let json = serde_json::to_string(&record)?;

        let mut conn = self.conn().await?;
        redis::pipe()
            .atomic()
            .set(self.job_key(&record.id), json)
            .ignore()
            .zadd(self.key("waiting"), &record.id, record.run_at.timestamp_millis())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        JOBS_ENQUEUED_TOTAL.with_label_values(&[kind]).inc();
        info!(job_id = %record.id, job_type = kind, "job enqueued");
        Ok(record.id)
    }

    async fn claim(&self, lease: Duration) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let deadline = now + chrono_delay(lease);

        let id: Option<String> = Script::new(CLAIM_DUE)
            .key(self.key("waiting"))
            .key(self.key("active"))
            .arg(now.timestamp_millis())
            .arg(deadline.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        let Some(id) = id else {
            return Ok(None);
        };

        let mut record = match self.load(&mut conn, &id).await {
            Ok(record) => record,
            Err(QueueError::NotFound(_)) => {
                warn!(job_id = %id, "claimed id has no record, dropping");
                conn.zrem::<_, _, ()>(self.key("active"), &id).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        record.transition(JobStatus::Active, now, None)?;
        conn.set::<_, _, ()>(self.job_key(&id), serde_json::to_string(&record)?)
            .await?;
        Ok(Some(record))
    }

    async fn complete(&self, id: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let mut record = self.load(&mut conn, id).await?;
        record.transition(JobStatus::Completed, Utc::now(), None)?;
        redis::pipe()
            .atomic()
            .set_ex(self.job_key(id), serde_json::to_string(&record)?, COMPLETED_RETENTION.as_secs())
            .ignore()
            .zrem(self.key("active"), id)
            .ignore()
            .hincr(self.key("stats"), "completed", 1)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn retry_later(&self, id: &str, error: &str, delay: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let mut record = self.load(&mut conn, id).await?;
        record.transition(JobStatus::Retrying, now, Some(error.to_string()))?;
        record.run_at = now + chrono_delay(delay);
        redis::pipe()
            .atomic()
            .set(self.job_key(id), serde_json::to_string(&record)?)
            .ignore()
            .zrem(self.key("active"), id)
            .ignore()
            .zadd(self.key("waiting"), id, record.run_at.timestamp_millis())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let record = self.load(&mut conn, id).await?;
        self.mark_failed(&mut conn, record, error, Utc::now()).await
    }

    async fn get(&self, id: &str) -> QueueResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        match self.load(&mut conn, id).await {
            Ok(record) => Ok(Some(record)),
            Err(QueueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let expired: Vec<String> = conn
            .zrangebyscore(self.key("active"), "-inf", now.timestamp_millis())
            .await?;

        let mut touched = 0u64;
        for id in expired {
            // Only the instance whose ZREM succeeds handles the expiry.
            let removed: i64 = conn.zrem(self.key("active"), &id).await?;
            if removed == 0 {
                continue;
            }
            touched += 1;

            let mut record = match self.load(&mut conn, &id).await {
                Ok(record) => record,
                Err(QueueError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            if record.attempts_exhausted() {
                let kind = record.job.kind();
                let attempts = record.attempts;
                self.mark_failed(&mut conn, record, LEASE_EXPIRED, now).await?;
                JOBS_FAILED_TOTAL.with_label_values(&[kind]).inc();
                error!(job_id = %id, job_type = kind, attempts, "job failed: lease expired on final attempt");
            } else {
                record.transition(JobStatus::Retrying, now, Some(LEASE_EXPIRED.to_string()))?;
                record.run_at = now;
                redis::pipe()
                    .atomic()
                    .set(self.job_key(&id), serde_json::to_string(&record)?)
                    .ignore()
                    .zadd(self.key("waiting"), &id, now.timestamp_millis())
                    .ignore()
                    .query_async::<()>(&mut conn)
                    .await?;
                warn!(job_id = %id, attempts = record.attempts, "job lease expired, redelivering");
            }
        }
        Ok(touched)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn().await?;
        let waiting: u64 = conn.zcard(self.key("waiting")).await?;
        let active: u64 = conn.zcard(self.key("active")).await?;
        let (completed, failed): (Option<u64>, Option<u64>) = redis::cmd("HMGET")
            .arg(self.key("stats"))
            .arg("completed")
            .arg("failed")
            .query_async(&mut conn)
            .await?;
        Ok(QueueStats {
            waiting,
            active,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
        })
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
