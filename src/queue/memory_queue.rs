// src/queue/memory_queue.rs
//! In-process queue for single-instance deployments and tests. Jobs do not
//! survive a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{
    chrono_delay, Job, JobId, JobQueue, JobRecord, JobStatus, QueueError, QueueResult, QueueStats,
    COMPLETED_RETENTION, FAILED_RETENTION, LEASE_EXPIRED,
};
use crate::monitoring::metrics::{JOBS_ENQUEUED_TOTAL, JOBS_FAILED_TOTAL};

#[derive(Default)]
struct State {
    records: HashMap<JobId, JobRecord>,
    /// (run_at ms, enqueue sequence, id): earliest due first, FIFO on ties.
    waiting: BTreeSet<(i64, u64, JobId)>,
    /// id -> lease deadline
    active: HashMap<JobId, DateTime<Utc>>,
    seq: u64,
}

impl State {
    fn park(&mut self, id: JobId, run_at: DateTime<Utc>) {
        self.seq += 1;
        self.waiting.insert((run_at.timestamp_millis(), self.seq, id));
    }

    /// Forget terminal records older than their retention.
    fn prune_terminal(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        let completed_cutoff = now - chrono_delay(COMPLETED_RETENTION);
        let failed_cutoff = now - chrono_delay(FAILED_RETENTION);
        self.records.retain(|_, r| match r.status {
            JobStatus::Completed => r.updated_at > completed_cutoff,
            JobStatus::Failed => r.updated_at > failed_cutoff,
            _ => true,
        });
        before - self.records.len()
    }

    fn record_mut(&mut self, id: &str) -> QueueResult<&mut JobRecord> {
        self.records
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }
}

pub struct MemoryQueue {
    state: Mutex<State>,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_attempts,
        }
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: Job) -> QueueResult<JobId> {
        job.validate()?;
        let kind = job.kind();
        let record = JobRecord::new(job, self.max_attempts, Utc::now());
        let id = record.id.clone();

        let mut state = self.state.lock();
        state.park(id.clone(), record.run_at);
        state.records.insert(id.clone(), record);
        drop(state);

        JOBS_ENQUEUED_TOTAL.with_label_values(&[kind]).inc();
        info!(job_id = %id, job_type = kind, "job enqueued");
        Ok(id)
    }

    async fn claim(&self, lease: Duration) -> QueueResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut state = self.state.lock();

        let due = match state.waiting.first() {
            Some(entry) if entry.0 <= now.timestamp_millis() => entry.clone(),
            _ => return Ok(None),
        };
        state.waiting.remove(&due);
        let id = due.2;

        let record = state.record_mut(&id)?;
        record.transition(JobStatus::Active, now, None)?;
        let claimed = record.clone();
        state.active.insert(id, now + chrono_delay(lease));
        Ok(Some(claimed))
    }

    async fn complete(&self, id: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state.record_mut(id)?.transition(JobStatus::Completed, Utc::now(), None)?;
        state.active.remove(id);
        Ok(())
    }

    async fn retry_later(&self, id: &str, error: &str, delay: Duration) -> QueueResult<()> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state.record_mut(id)?;
        record.transition(JobStatus::Retrying, now, Some(error.to_string()))?;
        let run_at = now + chrono_delay(delay);
        record.run_at = run_at;
        state.active.remove(id);
        state.park(id.to_string(), run_at);
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock();
        state
            .record_mut(id)?
            .transition(JobStatus::Failed, Utc::now(), Some(error.to_string()))?;
        state.active.remove(id);
        Ok(())
    }

    async fn get(&self, id: &str) -> QueueResult<Option<JobRecord>> {
        Ok(self.state.lock().records.get(id).cloned())
    }

    async fn requeue_expired(&self, now: DateTime<Utc>) -> QueueResult<u64> {
        let mut state = self.state.lock();
        let expired: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            state.active.remove(id);
            let record = state.record_mut(id)?;
            if record.attempts_exhausted() {
                record.transition(JobStatus::Failed, now, Some(LEASE_EXPIRED.to_string()))?;
                let kind = record.job.kind();
                JOBS_FAILED_TOTAL.with_label_values(&[kind]).inc();
                error!(job_id = %id, job_type = kind, attempts = record.attempts, "job failed: lease expired on final attempt");
            } else {
                record.transition(JobStatus::Retrying, now, Some(LEASE_EXPIRED.to_string()))?;
                record.run_at = now;
                state.park(id.clone(), now);
            }
        }

        let pruned = state.prune_terminal(now);
        if pruned > 0 {
            debug!(pruned, "dropped finished job records past retention");
        }
        Ok(expired.len() as u64)
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let state = self.state.lock();
        let mut stats = QueueStats::default();
        for record in state.records.values() {
            match record.status {
                JobStatus::Queued | JobStatus::Retrying => stats.waiting += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
