// src/queue/worker.rs
//! Long-running consumer: claims due jobs, runs them with bounded
//! concurrency and a per-job timeout, and reports the outcome.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{JobQueue, JobRecord, RetryPolicy};
use crate::monitoring::alerting_hooks::{send_alert, AlertingHooksConfig, JobFailedEvent};
use crate::monitoring::metrics::{JOBS_COMPLETED_TOTAL, JOBS_FAILED_TOTAL, JOBS_RETRIED_TOTAL};

#[derive(Debug, Error)]
pub enum JobError {
    /// Worth another attempt (network, provider 4xx/5xx that may clear).
    #[error("transient: {0}")]
    Transient(String),
    /// Retrying can't help (bad address, malformed payload).
    #[error("permanent: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, record: &JobRecord) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub job_timeout: Duration,
    /// Should comfortably exceed `job_timeout`, or healthy jobs get redelivered.
    pub lease: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            job_timeout: Duration::from_secs(30),
            lease: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    alerts: AlertingHooksConfig,
}

impl Worker {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
        alerts: AlertingHooksConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            alerts,
        }
    }

    /// Poll until `shutdown` flips to true, then wait for in-flight jobs.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let concurrency = self.config.concurrency.max(1);
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            queue = self.queue.name(),
            concurrency,
            poll_ms = self.config.poll_interval.as_millis() as u64,
            "Job worker started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.reclaim_expired().await;
                    self.fill(&permits).await;
                }
            }
        }

        info!("Job worker draining in-flight jobs");
        let _ = permits.acquire_many(concurrency as u32).await;
        info!("Job worker stopped");
    }

    /// Claim and spawn jobs while permits are free and jobs are due.
    async fn fill(&self, permits: &Arc<Semaphore>) {
        loop {
            let Ok(permit) = Arc::clone(permits).try_acquire_owned() else {
                return;
            };
            match self.queue.claim(self.config.lease).await {
                Ok(Some(record)) => {
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.process(record).await;
                        drop(permit);
                    });
                }
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, "Failed to claim job");
                    return;
                }
            }
        }
    }

    async fn reclaim_expired(&self) {
        match self.queue.requeue_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(n) => warn!(count = n, "Reclaimed jobs with expired leases"),
            Err(e) => warn!(error = %e, "Failed to reclaim expired jobs"),
        }
    }

    /// Process due jobs one by one until none is left. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        loop {
            match self.queue.claim(self.config.lease).await {
                Ok(Some(record)) => {
                    self.process(record).await;
                    processed += 1;
                }
                Ok(None) => return processed,
                Err(e) => {
                    warn!(error = %e, "Failed to claim job");
                    return processed;
                }
            }
        }
    }

    pub async fn process(&self, record: JobRecord) {
        let kind = record.job.kind();
        let started = Instant::now();
        debug!(job_id = %record.id, job_type = kind, attempt = record.attempts, "Processing job");

        let outcome = match tokio::time::timeout(self.config.job_timeout, self.handler.handle(&record)).await {
            Ok(result) => result,
            Err(_) => Err(JobError::Transient(format!(
                "timed out after {}ms",
                self.config.job_timeout.as_millis()
            ))),
        };

        let ack = match outcome {
            Ok(()) => {
                JOBS_COMPLETED_TOTAL.with_label_values(&[kind]).inc();
                info!(
                    job_id = %record.id,
                    job_type = kind,
                    attempt = record.attempts,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                self.queue.complete(&record.id).await
            }
            Err(JobError::Transient(msg)) if !record.attempts_exhausted() => {
                let delay = self.config.retry.delay_for(record.attempts);
                JOBS_RETRIED_TOTAL.with_label_values(&[kind]).inc();
                warn!(
                    job_id = %record.id,
                    job_type = kind,
                    attempt = record.attempts,
                    max_attempts = record.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %msg,
                    "Job attempt failed, will retry"
                );
                self.queue.retry_later(&record.id, &msg, delay).await
            }
            Err(e) => {
                let msg = e.to_string();
                JOBS_FAILED_TOTAL.with_label_values(&[kind]).inc();
                error!(
                    job_id = %record.id,
                    job_type = kind,
                    attempts = record.attempts,
                    error = %msg,
                    "Job failed permanently"
                );
                send_alert(
                    &self.alerts,
                    JobFailedEvent::new(&record.id, kind, record.attempts, &msg),
                );
                self.queue.fail(&record.id, &msg).await
            }
        };

        if let Err(e) = ack {
            // The lease will lapse and the job comes back; at-least-once.
            warn!(job_id = %record.id, error = %e, "Failed to record job outcome");
        }
    }
}
