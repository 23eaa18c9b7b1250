// src/main.rs
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use actix_web::web;
use zanly::api::{start_api_server, AppState};
use zanly::cache::{CacheAside, CacheBackend, CacheClient, InvalidationCoordinator, MemoryCache, RedisCache};
use zanly::config::ApiConfig;
use zanly::db::SqliteStore;
use zanly::mailer::{LogTransport, NotificationTransport, SmtpTransport};
use zanly::monitoring::{metrics, tracing_config};
use zanly::queue::redis_queue::RedisQueueConfig;
use zanly::queue::{CleanupScheduler, JobQueue, MemoryQueue, RedisQueue, SideEffectHandler, Worker};
use zanly::rag::{create_llm_provider, RagPipeline};
use zanly::security::rate_limiter::RateLimiter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal startup error");
        eprintln!("zanly: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<(), BoxError> {
    let config = ApiConfig::from_env()?;
    let _log_guard = tracing_config::init_tracing(&config.monitoring)?;
    metrics::init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_sha = env!("GIT_SHA"),
        "Starting zanly"
    );

    let store = Arc::new(SqliteStore::open(&config.database_path, config.database_timeout)?);
    info!(path = %config.database_path.display(), "Database ready");

    let backend: Arc<dyn CacheBackend> = match &config.cache.redis_url {
        Some(url) => Arc::new(RedisCache::new(url, config.cache.connect_timeout)?),
        None => {
            warn!("REDIS_URL not set, using in-process cache and rate-limit counters");
            Arc::new(MemoryCache::new(config.cache.memory_capacity))
        }
    };
    info!(backend = backend.name(), "Cache backend selected");
    let cache = CacheClient::new(backend, config.cache.op_timeout);

    let queue: Arc<dyn JobQueue> = match &config.queue.redis_url {
        Some(url) => Arc::new(RedisQueue::new(RedisQueueConfig {
            redis_url: url.clone(),
            namespace: config.queue.namespace.clone(),
            max_attempts: config.queue.max_attempts,
            connect_timeout: config.cache.connect_timeout,
        })?),
        None => Arc::new(MemoryQueue::new(config.queue.max_attempts)),
    };
    info!(queue = queue.name(), "Job queue selected");

    let transport: Arc<dyn NotificationTransport> = match &config.mail.smtp {
        Some(smtp) => Arc::new(SmtpTransport::new(smtp)?),
        None => {
            warn!("SMTP_HOST not set, emails will be logged instead of sent");
            Arc::new(LogTransport)
        }
    };

    let llm = create_llm_provider(config.llm.clone(), config.rag.model_timeout)?;
    let rag = RagPipeline::new(cache.clone(), store.clone(), llm, config.rag.clone());

    let handler = Arc::new(SideEffectHandler::new(
        transport,
        store.clone(),
        InvalidationCoordinator::new(cache.clone()),
        config.mail.app_name.clone(),
    ));
    let worker = Worker::new(queue.clone(), handler, config.worker.clone(), config.alerts.clone());
    let scheduler = CleanupScheduler::new(queue.clone(), config.cleanup_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_task = tokio::spawn(worker.run(shutdown_rx.clone()));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown_rx));

    let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), cache.clone()));
    let state = web::Data::new(AppState::new(
        store,
        CacheAside::with_policy(cache, config.cache.on_unavailable),
        queue,
        rag,
        config.cache.default_ttl,
    ));
    let health = state.health.clone();

    let server = start_api_server(&config, state, limiter)?;
    health.mark_ready();

    // Returns after SIGINT/SIGTERM once in-flight requests are done.
    let served = server.await;
    health.mark_not_ready();

    info!("HTTP server stopped, stopping background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_task.await {
        error!(error = %e, "Worker task panicked");
    }
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task panicked");
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}
