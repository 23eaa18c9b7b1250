// tests/job_queue.rs
// Producer -> queue -> worker -> transport, on the in-memory queue.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use zanly::cache::{CacheClient, InvalidationCoordinator, MemoryCache};
use zanly::db::SqliteStore;
use zanly::mailer::{MessageId, NotificationTransport, Template, TemplateData, TransportError};
use zanly::monitoring::alerting_hooks::AlertingHooksConfig;
use zanly::queue::{
    EmailJob, EmailType, Job, JobQueue, JobStatus, MemoryQueue, RetryPolicy, SideEffectHandler,
    Worker, WorkerConfig,
};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, Template, String)>>,
    /// Fail every send with this error kind instead of delivering.
    outage: Option<fn() -> TransportError>,
}

#[async_trait]
impl NotificationTransport for Outbox {
    async fn send(
        &self,
        to: &str,
        _subject: &str,
        template: Template,
        _data: &TemplateData,
        idempotency_key: &str,
    ) -> Result<MessageId, TransportError> {
        if let Some(err) = self.outage {
            return Err(err());
        }
        self.sent
            .lock()
            .push((to.to_string(), template, idempotency_key.to_string()));
        Ok(format!("<{}@zanly>", idempotency_key))
    }

    fn name(&self) -> &'static str {
        "outbox"
    }
}

fn refused() -> TransportError {
    TransportError::Unavailable("connection refused".into())
}

fn no_such_user() -> TransportError {
    TransportError::Rejected("550 no such user".into())
}

fn worker(queue: Arc<MemoryQueue>, outbox: Arc<Outbox>) -> Worker {
    let cache = CacheClient::new(Arc::new(MemoryCache::new(64)), Duration::from_millis(250));
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let handler = Arc::new(SideEffectHandler::new(
        outbox,
        store,
        InvalidationCoordinator::new(cache),
        "Zanly",
    ));
    Worker::new(
        queue,
        handler,
        WorkerConfig {
            poll_interval: Duration::from_millis(10),
            retry: RetryPolicy {
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            ..Default::default()
        },
        AlertingHooksConfig::default(),
    )
}

fn welcome(to: &str) -> Job {
    Job::SendEmail(EmailJob {
        to: to.to_string(),
        name: "Ada".to_string(),
        email_type: EmailType::Welcome,
        otp: None,
    })
}

fn statuses(history: &[zanly::queue::JobTransition]) -> Vec<JobStatus> {
    history.iter().map(|t| t.status).collect()
}

#[tokio::test]
async fn test_send_email_runs_once_and_completes() {
    let queue = Arc::new(MemoryQueue::new(3));
    let outbox = Arc::new(Outbox::default());
    let worker = worker(queue.clone(), outbox.clone());

    let id = queue.enqueue(welcome("ada@example.com")).await.unwrap();
    assert_eq!(worker.drain().await, 1);

    let record = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.attempts, 1);
    assert_eq!(
        statuses(&record.history),
        vec![JobStatus::Queued, JobStatus::Active, JobStatus::Completed]
    );

    let sent = outbox.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "ada@example.com");
    assert_eq!(sent[0].1, Template::Welcome);
    // Redeliveries of the same job reuse the same idempotency key.
    assert_eq!(sent[0].2, id);
}

#[tokio::test]
async fn test_transient_outage_retries_until_attempts_run_out() {
    let queue = Arc::new(MemoryQueue::new(3));
    let outbox = Arc::new(Outbox {
        outage: Some(refused as fn() -> TransportError),
        ..Default::default()
    });
    let worker = worker(queue.clone(), outbox);

    let id = queue.enqueue(welcome("ada@example.com")).await.unwrap();
    assert_eq!(worker.drain().await, 3);

    let record = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(
        statuses(&record.history),
        vec![
            JobStatus::Queued,
            JobStatus::Active,
            JobStatus::Retrying,
            JobStatus::Active,
            JobStatus::Retrying,
            JobStatus::Active,
            JobStatus::Failed,
        ]
    );
    assert!(record.last_error.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_rejected_recipient_fails_without_retry() {
    let queue = Arc::new(MemoryQueue::new(3));
    let outbox = Arc::new(Outbox {
        outage: Some(no_such_user as fn() -> TransportError),
        ..Default::default()
    });
    let worker = worker(queue.clone(), outbox);

    let id = queue.enqueue(welcome("ghost@example.com")).await.unwrap();
    assert_eq!(worker.drain().await, 1);

    let record = queue.get(&id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.attempts, 1);

    let stats = queue.stats().await.unwrap();
    assert_eq!((stats.waiting, stats.active, stats.failed), (0, 0, 1));
}

#[tokio::test]
async fn test_running_worker_picks_up_jobs_and_stops_on_shutdown() {
    let queue = Arc::new(MemoryQueue::new(3));
    let outbox = Arc::new(Outbox::default());
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(worker(queue.clone(), outbox.clone()).run(rx));

    let id = queue.enqueue(welcome("ada@example.com")).await.unwrap();

    let mut done = false;
    for _ in 0..200 {
        if queue.get(&id).await.unwrap().unwrap().status == JobStatus::Completed {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(done, "worker never completed the job");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("worker did not stop")
        .unwrap();
    assert_eq!(outbox.sent.lock().len(), 1);
}
