use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

// Global Prometheus registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn service_and_env() -> (String, String) {
    let service = std::env::var("APP_SERVICE")
        .ok()
        .unwrap_or_else(|| env!("APP_SERVICE_DEFAULT").to_string());
    let env_name = std::env::var("APP_ENV")
        .ok()
        .unwrap_or_else(|| env!("APP_ENV_DEFAULT").to_string());
    (service, env_name)
}

fn counter(name: &str, help: &str) -> IntCounter {
    let (service, env_name) = service_and_env();
    let c = IntCounter::with_opts(
        Opts::new(name, help)
            .const_label("service", service)
            .const_label("env", env_name),
    )
    .unwrap_or_else(|e| panic!("invalid metric {}: {}", name, e));
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let (service, env_name) = service_and_env();
    let c = IntCounterVec::new(
        Opts::new(name, help)
            .const_label("service", service)
            .const_label("env", env_name),
        labels,
    )
    .unwrap_or_else(|e| panic!("invalid metric {}: {}", name, e));
    REGISTRY.register(Box::new(c.clone())).ok();
    c
}

// App info gauge (const)
pub static APP_INFO: Lazy<IntGauge> = Lazy::new(|| {
    let (service, env_name) = service_and_env();
    let g = IntGauge::with_opts(
        Opts::new("app_info", "Application info gauge")
            .const_label("service", &service)
            .const_label("env", &env_name)
            .const_label("version", env!("CARGO_PKG_VERSION"))
            .const_label("git_sha", env!("GIT_SHA"))
            .const_label("build_time", env!("BUILD_TIME")),
    )
    .unwrap_or_else(|e| panic!("invalid metric app_info: {}", e));
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});

// Cache
pub static CACHE_HITS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_hits_total", "Total cache hits"));

pub static CACHE_MISSES_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("cache_misses_total", "Total cache misses"));

pub static CACHE_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "cache_errors_total",
        "Cache backend errors and timeouts by operation",
        &["op"],
    )
});

pub static INVALIDATIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "cache_invalidations_total",
        "Invalidation passes by resource",
        &["resource"],
    )
});

pub static INVALIDATION_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "cache_invalidation_failures_total",
        "Invalidation deletes that failed, by resource",
        &["resource"],
    )
});

// Rate limiting
pub static RATE_LIMIT_DROPS_TOTAL: Lazy<IntCounter> =
    Lazy::new(|| counter("rate_limit_drops_total", "Requests rejected by the rate limiter"));

pub static RATE_LIMIT_BACKEND_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "rate_limit_backend_errors_total",
        "Rate limit checks that could not reach the counter store",
    )
});

// Jobs
pub static JOBS_ENQUEUED_TOTAL: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("jobs_enqueued_total", "Jobs enqueued by type", &["type"]));

pub static JOBS_COMPLETED_TOTAL: Lazy<IntCounterVec> =
    Lazy::new(|| counter_vec("jobs_completed_total", "Jobs completed by type", &["type"]));

pub static JOBS_RETRIED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "jobs_retried_total",
        "Job attempts that failed and were rescheduled",
        &["type"],
    )
});

pub static JOBS_FAILED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "jobs_failed_total",
        "Jobs that exhausted retries or failed permanently",
        &["type"],
    )
});

// RAG
pub static RAG_ANSWERS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec(
        "rag_answers_total",
        "Answers by source (cache, generated, fallback)",
        &["source"],
    )
});

pub static RAG_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    let (service, env_name) = service_and_env();
    let mut opts = HistogramOpts::new("rag_latency_ms", "End-to-end answer latency in milliseconds")
        .buckets(vec![5.0, 25.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]);
    opts.common_opts = opts
        .common_opts
        .const_label("service", service)
        .const_label("env", env_name);
    let h = Histogram::with_opts(opts)
        .unwrap_or_else(|e| panic!("invalid metric rag_latency_ms: {}", e));
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

/// Touch every metric so the exposition lists them before first use.
pub fn init() {
    APP_INFO.set(1);
    Lazy::force(&CACHE_HITS_TOTAL);
    Lazy::force(&CACHE_MISSES_TOTAL);
    Lazy::force(&CACHE_ERRORS_TOTAL);
    Lazy::force(&INVALIDATIONS_TOTAL);
    Lazy::force(&INVALIDATION_FAILURES_TOTAL);
    Lazy::force(&RATE_LIMIT_DROPS_TOTAL);
    Lazy::force(&RATE_LIMIT_BACKEND_ERRORS_TOTAL);
    Lazy::force(&JOBS_ENQUEUED_TOTAL);
    Lazy::force(&JOBS_COMPLETED_TOTAL);
    Lazy::force(&JOBS_RETRIED_TOTAL);
    Lazy::force(&JOBS_FAILED_TOTAL);
    Lazy::force(&RAG_ANSWERS_TOTAL);
    Lazy::force(&RAG_LATENCY_MS);
}

pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
