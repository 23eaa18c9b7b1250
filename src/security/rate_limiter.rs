use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheClient, CacheError, CacheKey};
use crate::monitoring::metrics::{RATE_LIMIT_BACKEND_ERRORS_TOTAL, RATE_LIMIT_DROPS_TOTAL};
use crate::policy::OnUnavailable;

const KEY_PREFIX: &str = "rl";

#[derive(Clone, Debug)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub window: Duration,
    pub max_requests: u64,
    pub on_unavailable: OnUnavailable,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::from_secs(15 * 60),
            max_requests: 100,
            on_unavailable: OnUnavailable::FailClosed,
        }
    }
}

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit store unavailable: {0}")]
    Unavailable(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Epoch milliseconds at which the current window closes.
    pub reset_at_ms: u64,
}

impl RateDecision {
    /// Whole seconds until the window closes, at least 1.
    pub fn reset_after_secs(&self, now_ms: u64) -> u64 {
        let ms = self.reset_at_ms.saturating_sub(now_ms);
        ms.div_ceil(1000).max(1)
    }
}

/// Fixed-window counter shared by every instance through the cache backend.
///
/// Counts from all instances land on the same `rl:<identity>:<window>` key,
/// so the limit holds cluster-wide. A burst of up to twice the limit can
/// straddle a window boundary.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    cache: CacheClient,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, cache: CacheClient) -> Self {
        Self { config, cache }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn window_ms(&self) -> u64 {
        (self.config.window.as_millis() as u64).max(1)
    }

    pub fn window_key(identity: &str, window_index: u64) -> CacheKey {
        CacheKey::resource(KEY_PREFIX)
            .segment(identity)
            .segment(window_index)
    }

    pub async fn check(&self, identity: &str) -> Result<RateDecision, RateLimitError> {
        self.check_at(identity, now_ms()).await
    }

    /// Count one request for `identity` at `now_ms` and decide.
    ///
    /// Backend failures follow `on_unavailable`: open admits the request,
    /// closed returns the error.
    pub async fn check_at(&self, identity: &str, now_ms: u64) -> Result<RateDecision, RateLimitError> {
        let limit = self.config.max_requests;
        let window_ms = self.window_ms();
        let index = now_ms / window_ms;
        let reset_at_ms = (index + 1) * window_ms;

        if !self.config.enabled {
            return Ok(RateDecision {
                allowed: true,
                limit,
                remaining: limit,
                reset_at_ms,
            });
        }

        let key = Self::window_key(identity, index);
        let count = match self.cache.incr(key.as_str(), self.config.window).await {
            Ok(count) => count,
            Err(e) => {
                RATE_LIMIT_BACKEND_ERRORS_TOTAL.inc();
                warn!(key = %key, error = %e, policy = ?self.config.on_unavailable, "rate limit check failed");
                if self.config.on_unavailable.is_open() {
                    return Ok(RateDecision {
                        allowed: true,
                        limit,
                        remaining: limit,
                        reset_at_ms,
                    });
                }
                return Err(RateLimitError::Unavailable(e));
            }
        };

        let allowed = count <= limit;
        if !allowed {
            RATE_LIMIT_DROPS_TOTAL.inc();
            debug!(identity, count, limit, "rate limit exceeded");
        }
        Ok(RateDecision {
            allowed,
            limit,
            remaining: limit.saturating_sub(count),
            reset_at_ms,
        })
    }
}
