// src/queue/scheduler.rs
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{info, warn};

use super::{CleanupJob, CleanupTarget, Job, JobQueue};

/// Periodically enqueues `cleanupExpired(notifications)`.
///
/// Each instance runs its own scheduler, so N instances enqueue N cleanups
/// per period. The job is idempotent, duplicates only cost a query.
pub struct CleanupScheduler {
    queue: Arc<dyn JobQueue>,
    every: Duration,
}

impl CleanupScheduler {
    pub fn new(queue: Arc<dyn JobQueue>, every: Duration) -> Self {
        Self { queue, every }
    }

    pub async fn tick(&self) {
        let job = Job::CleanupExpired(CleanupJob {
            target: CleanupTarget::Notifications,
        });
        if let Err(e) = self.queue.enqueue(job).await {
            warn!(error = %e, "Failed to enqueue scheduled cleanup");
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.every.is_zero() {
            info!("Cleanup scheduler disabled");
            return;
        }
        // First run one period after start, not at boot.
        let mut ticker = interval_at(Instant::now() + self.every, self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(every_secs = self.every.as_secs(), "Cleanup scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Cleanup scheduler shutting down");
                        break;
                    }
                }
                _ = ticker.tick() => self.tick().await,
            }
        }
    }
}
