// src/api/mod.rs
//! HTTP surface.
//!
//! Reads go through [`CacheAside`], writes go to the store and then through
//! the [`InvalidationCoordinator`], slow side effects are enqueued. Every
//! route except `/health` and `/monitoring/*` sits behind the rate limiter.

pub mod admin_routes;
pub mod identity;
pub mod student_routes;

use actix_cors::Cors;
use actix_web::dev::Server;
use actix_web::http::header;
use actix_web::{web, App, HttpResponse, HttpServer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::cache::keys::Pagination;
use crate::cache::{CacheAside, CacheKey, InvalidationCoordinator};
use crate::config::ApiConfig;
use crate::db::{
    BookmarkStore, Material, MaterialFilter, MaterialStore, NotificationStore, SqliteStore,
    UserStore,
};
use crate::error::AppError;
use crate::monitoring::health::{ComponentHealth, ComponentStatus, HealthTracker};
use crate::monitoring::metrics;
use crate::monitoring::rate_limit_middleware::{RateLimitMiddleware, RateLimitOptions};
use crate::queue::JobQueue;
use crate::rag::RagPipeline;
use crate::security::rate_limiter::RateLimiter;

/// Everything a handler may touch. Built once in `main`, shared by all
/// HTTP workers.
pub struct AppState {
    pub users: Arc<dyn UserStore>,
    pub materials: Arc<dyn MaterialStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub bookmarks: Arc<dyn BookmarkStore>,
    pub cache: CacheAside,
    pub invalidator: InvalidationCoordinator,
    pub queue: Arc<dyn JobQueue>,
    pub rag: RagPipeline,
    pub health: Arc<HealthTracker>,
    /// TTL for listing and entity entries.
    pub cache_ttl: Duration,
}

pub const BOOKMARKS_TTL: Duration = Duration::from_secs(600);

impl AppState {
    pub fn new(
        store: Arc<SqliteStore>,
        cache: CacheAside,
        queue: Arc<dyn JobQueue>,
        rag: RagPipeline,
        cache_ttl: Duration,
    ) -> Self {
        let invalidator = InvalidationCoordinator::new(cache.client().clone());
        Self {
            users: store.clone(),
            materials: store.clone(),
            notifications: store.clone(),
            bookmarks: store,
            cache,
            invalidator,
            queue,
            rag,
            health: Arc::new(HealthTracker::new()),
            cache_ttl,
        }
    }
}

/// One page of a material listing, cached as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialPage {
    pub page: u32,
    pub total_pages: u64,
    pub total: u64,
    pub materials: Vec<Material>,
}

/// Cache-aside read of one listing page.
pub(crate) async fn material_page(
    state: &AppState,
    key: &CacheKey,
    filter: MaterialFilter,
    pagination: Pagination,
) -> Result<MaterialPage, AppError> {
    state
        .cache
        .fetch(key, state.cache_ttl, || async {
            let (materials, total) = tokio::try_join!(
                state.materials.list_materials(&filter, pagination.skip(), pagination.take()),
                state.materials.count_materials(&filter),
            )?;
            Ok::<_, AppError>(MaterialPage {
                page: pagination.page,
                total_pages: pagination.total_pages(total),
                total,
                materials,
            })
        })
        .await
}

async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let (cache, queue, database) = tokio::join!(
        state.cache.client().ping(),
        state.queue.stats(),
        state.users.count_users(),
    );
    let status = state.health.evaluate(ComponentHealth {
        cache: ComponentStatus::from_probe(&cache),
        queue: ComponentStatus::from_probe(&queue.map(|_| ())),
        database: ComponentStatus::from_probe(&database.map(|_| ())),
    });

    if status.is_serving() {
        HttpResponse::Ok().json(status)
    } else {
        HttpResponse::ServiceUnavailable().json(status)
    }
}

async fn get_metrics() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(metrics::export_prometheus())
}

/// Route table, shared by the server and the integration tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/monitoring/metrics", web::get().to(get_metrics))
        .service(
            web::scope("/api/v1")
                .configure(student_routes::configure)
                .service(web::scope("/admin").configure(admin_routes::configure)),
        );
}

fn cors(origin: Option<&str>) -> Cors {
    let cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE"])
        .allowed_headers(vec![
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(identity::USER_ID_HEADER),
            header::HeaderName::from_static(identity::USER_ROLE_HEADER),
        ])
        .expose_headers(vec!["ratelimit-limit", "ratelimit-remaining", "ratelimit-reset", "retry-after"])
        .max_age(3600);
    match origin {
        Some(origin) => cors.allowed_origin(origin).supports_credentials(),
        None => cors.allow_any_origin(),
    }
}

pub fn start_api_server(
    config: &ApiConfig,
    state: web::Data<AppState>,
    limiter: Arc<RateLimiter>,
) -> std::io::Result<Server> {
    let opts: RateLimitOptions = config.rate_limit_options.clone();
    let cors_origin = config.server.cors_origin.clone();
    let bind_addr = config.bind_addr();

    info!(
        trust_proxy = opts.trust_proxy,
        window_ms = limiter.config().window.as_millis() as u64,
        max_requests = limiter.config().max_requests,
        exempt_prefixes = %serde_json::to_string(&opts.exempt_prefixes).unwrap_or_default(),
        "Rate limit options initialized"
    );

    let mut server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::bad_request(err.to_string()).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                AppError::bad_request(err.to_string()).into()
            }))
            .wrap(RateLimitMiddleware::new_with_options(limiter.clone(), opts.clone()))
            .wrap(cors(cors_origin.as_deref()))
            .configure(configure)
    });
    if let Some(workers) = config.server.workers {
        server = server.workers(workers.max(1));
    }

    info!(addr = %bind_addr, "Starting API server");
    Ok(server.bind(bind_addr)?.run())
}
