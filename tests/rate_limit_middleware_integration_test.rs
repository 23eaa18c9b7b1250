// File: tests/rate_limit_middleware_integration_test.rs
// Purpose: Integration tests for the fixed-window rate limiting middleware
//
// Run with: cargo test --test rate_limit_middleware_integration_test -- --nocapture

use actix_web::{http::StatusCode, test, web, App, HttpResponse};
use std::sync::Arc;
use std::time::Duration;

use zanly::cache::{CacheClient, MemoryCache};
use zanly::monitoring::rate_limit_middleware::{RateLimitMiddleware, RateLimitOptions};
use zanly::policy::OnUnavailable;
use zanly::security::rate_limiter::{RateLimiter, RateLimiterConfig};

// ───────────────────────────────────────────────────────────────────────────
// Helpers
// ───────────────────────────────────────────────────────────────────────────

async fn test_handler() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

fn limiter(max_requests: u64) -> Arc<RateLimiter> {
    let cache = CacheClient::new(Arc::new(MemoryCache::new(128)), Duration::from_millis(200));
    Arc::new(RateLimiter::new(
        RateLimiterConfig {
            enabled: true,
            window: Duration::from_secs(900),
            max_requests,
            on_unavailable: OnUnavailable::FailClosed,
        },
        cache,
    ))
}

fn opts() -> RateLimitOptions {
    RateLimitOptions {
        trust_proxy: true,
        ..Default::default()
    }
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 1: Requests under the limit pass and carry the budget headers
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_allows_first_request() {
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter(5), opts()))
            .route("/api/v1/user/materials", web::get().to(test_handler)),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/api/v1/user/materials")
        .insert_header(("X-Forwarded-For", "198.51.100.1"))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("ratelimit-limit").unwrap(), "5");
    assert_eq!(resp.headers().get("ratelimit-remaining").unwrap(), "4");
    assert!(resp.headers().contains_key("ratelimit-reset"));
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 2: Request limit+1 inside the window is rejected with Retry-After
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_blocks_excess_requests() {
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter(2), opts()))
            .route("/search", web::get().to(test_handler)),
    )
    .await;

    for _ in 0..2 {
        let req = test::TestRequest::get()
            .uri("/search")
            .insert_header(("X-Forwarded-For", "198.51.100.2"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    let req = test::TestRequest::get()
        .uri("/search")
        .insert_header(("X-Forwarded-For", "198.51.100.2"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);

    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 900);
    assert_eq!(resp.headers().get("ratelimit-remaining").unwrap(), "0");

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "fail");
    assert_eq!(body["message"], "Too many requests, please try again later.");
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 3: Each client has its own budget
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_limits_per_client() {
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter(1), opts()))
            .route("/search", web::get().to(test_handler)),
    )
    .await;

    let first = test::TestRequest::get()
        .uri("/search")
        .insert_header(("X-Forwarded-For", "203.0.113.1"))
        .to_request();
    assert_eq!(test::call_service(&app, first).await.status(), StatusCode::OK);

    let other = test::TestRequest::get()
        .uri("/search")
        .insert_header(("X-Forwarded-For", "203.0.113.2"))
        .to_request();
    assert_eq!(test::call_service(&app, other).await.status(), StatusCode::OK);

    let again = test::TestRequest::get()
        .uri("/search")
        .insert_header(("X-Forwarded-For", "203.0.113.1"))
        .to_request();
    assert_eq!(
        test::call_service(&app, again).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 4: Exempt prefixes are never counted
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_exempt_paths() {
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter(1), opts()))
            .route("/health", web::get().to(test_handler))
            .route("/search", web::get().to(test_handler)),
    )
    .await;

    for _ in 0..5 {
        let req = test::TestRequest::get()
            .uri("/health")
            .insert_header(("X-Forwarded-For", "192.0.2.9"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(!resp.headers().contains_key("ratelimit-limit"));
    }

    // The health probes above did not consume the budget.
    let req = test::TestRequest::get()
        .uri("/search")
        .insert_header(("X-Forwarded-For", "192.0.2.9"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 5: Disabled limiter admits everything
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_disabled() {
    let cache = CacheClient::new(Arc::new(MemoryCache::new(16)), Duration::from_millis(200));
    let limiter = Arc::new(RateLimiter::new(
        RateLimiterConfig {
            enabled: false,
            max_requests: 1,
            ..Default::default()
        },
        cache,
    ));
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter, opts()))
            .route("/search", web::get().to(test_handler)),
    )
    .await;

    for _ in 0..3 {
        let req = test::TestRequest::get().uri("/search").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}

// ───────────────────────────────────────────────────────────────────────────
// TEST 6: Rotating bearer tokens from one address share one budget
// ───────────────────────────────────────────────────────────────────────────

#[actix_web::test]
async fn test_middleware_ignores_bearer_tokens() {
    let app = test::init_service(
        App::new()
            .wrap(RateLimitMiddleware::new_with_options(limiter(1), opts()))
            .route("/search", web::get().to(test_handler)),
    )
    .await;

    let mut statuses = Vec::new();
    for i in 0..5 {
        let req = test::TestRequest::get()
            .uri("/search")
            .insert_header(("X-Forwarded-For", "198.51.100.50"))
            .insert_header(("Authorization", format!("Bearer token-{}", i)))
            .to_request();
        statuses.push(test::call_service(&app, req).await.status());
    }

    assert_eq!(statuses[0], StatusCode::OK);
    assert!(statuses[1..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
}
