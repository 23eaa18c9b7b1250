// src/monitoring/rate_limit_middleware.rs
//
// Per-client fixed-window rate limiting in front of every non-exempt route.
// Counts live in the shared cache backend, so all instances enforce one
// budget per client.

use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header::{HeaderName, HeaderValue, RETRY_AFTER},
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::sync::Arc;
use tracing::{error, warn};

use crate::security::rate_limiter::{now_ms, RateDecision, RateLimiter};

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Extract client IP with TRUST_PROXY support
///
/// Priority:
/// 1. X-Forwarded-For header (first IP)
/// 2. Forwarded header (for= field)
/// 3. peer_addr from connection_info
fn extract_client_ip(req: &ServiceRequest, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(header) = req.headers().get("X-Forwarded-For") {
            if let Ok(s) = header.to_str() {
                if let Some(ip) = s.split(',').next().map(str::trim).filter(|ip| !ip.is_empty()) {
                    return ip.to_string();
                }
            }
        }

        // RFC 7239: "for=192.0.2.1" or "for=\"[2001:db8:cafe::17]\""
        if let Some(header) = req.headers().get("Forwarded") {
            if let Ok(s) = header.to_str() {
                let first_hop = s.split(',').next().unwrap_or(s);
                if let Some(for_clause) = first_hop
                    .split(';')
                    .map(str::trim)
                    .find(|c| c.to_ascii_lowercase().starts_with("for="))
                {
                    let ip = for_clause[4..]
                        .trim()
                        .trim_matches('"')
                        .trim_start_matches('[')
                        .trim_end_matches(']');
                    return ip.to_string();
                }
            }
        }
    }

    req.connection_info()
        .peer_addr()
        .unwrap_or("127.0.0.1")
        .to_string()
}

/// Every caller is limited per address. Bearer tokens are not verified at
/// this layer, so keying on them would let a client mint a fresh budget per
/// request.
fn client_identity(req: &ServiceRequest, trust_proxy: bool) -> String {
    format!("ip-{}", extract_client_ip(req, trust_proxy))
}

#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub trust_proxy: bool,
    pub message: String,
    pub exempt_prefixes: Vec<String>,
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self {
            trust_proxy: false,
            message: "Too many requests, please try again later.".to_string(),
            exempt_prefixes: vec!["/health".to_string(), "/monitoring".to_string()],
        }
    }
}

impl RateLimitOptions {
    pub fn is_exempt(&self, path: &str) -> bool {
        self.exempt_prefixes.iter().any(|p| path.starts_with(p.as_str()))
    }
}

fn apply_headers(headers: &mut actix_web::http::header::HeaderMap, decision: &RateDecision, now: u64) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(decision.reset_after_secs(now)));
}

pub struct RateLimitMiddleware {
    rate_limiter: Arc<RateLimiter>,
    opts: RateLimitOptions,
}

impl RateLimitMiddleware {
    pub fn new_with_options(rate_limiter: Arc<RateLimiter>, opts: RateLimitOptions) -> Self {
        Self { rate_limiter, opts }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = RateLimitMiddlewareService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(RateLimitMiddlewareService {
            service: Arc::new(service),
            rate_limiter: Arc::clone(&self.rate_limiter),
            opts: self.opts.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Arc<S>,
    rate_limiter: Arc<RateLimiter>,
    opts: RateLimitOptions,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Arc::clone(&self.service);

        if self.opts.is_exempt(req.path()) {
            return Box::pin(async move {
                let res = service.call(req).await?;
                Ok(res.map_into_left_body())
            });
        }

        let identity = client_identity(&req, self.opts.trust_proxy);
        let limiter = Arc::clone(&self.rate_limiter);
        let message = self.opts.message.clone();

        Box::pin(async move {
            let now = now_ms();
            let decision = match limiter.check_at(&identity, now).await {
                Ok(decision) => decision,
                Err(e) => {
                    error!(identity = %identity, path = %req.path(), error = %e, "rate limiter unavailable, rejecting request");
                    let resp = HttpResponse::ServiceUnavailable().json(serde_json::json!({
                        "status": "error",
                        "message": "Service temporarily unavailable",
                    }));
                    return Ok(req.into_response(resp.map_into_right_body()));
                }
            };

            if !decision.allowed {
                let retry_after = decision.reset_after_secs(now);
                warn!(
                    identity = %identity,
                    path = %req.path(),
                    limit = decision.limit,
                    retry_after_secs = retry_after,
                    "Rate limit exceeded"
                );
                let mut resp = HttpResponse::TooManyRequests()
                    .insert_header((RETRY_AFTER, HeaderValue::from(retry_after)))
                    .json(serde_json::json!({
                        "status": "fail",
                        "message": message,
                    }));
                apply_headers(resp.headers_mut(), &decision, now);
                return Ok(req.into_response(resp.map_into_right_body()));
            }

            let mut res = service.call(req).await?;
            apply_headers(res.headers_mut(), &decision, now);
            Ok(res.map_into_left_body())
        })
    }
}
