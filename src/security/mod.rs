pub mod rate_limiter;

pub use rate_limiter::{RateDecision, RateLimitError, RateLimiter, RateLimiterConfig};
