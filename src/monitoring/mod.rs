//! Monitoring module for zanly
//!
//! Provides:
//! - Structured logging with tracing
//! - Prometheus metrics collection
//! - Health reporting
//! - Rate-limit middleware and job failure alerts

pub mod alerting_hooks;
pub mod config;
pub mod health;
pub mod metrics;
pub mod rate_limit_middleware;
pub mod tracing_config;

pub use alerting_hooks::{AlertingHooksConfig, JobFailedEvent};
pub use config::{LogFormat, MonitoringConfig};
pub use health::{ComponentHealth, ComponentStatus, HealthStatus, HealthTracker};
pub use metrics::{export_prometheus, REGISTRY};
pub use rate_limit_middleware::{RateLimitMiddleware, RateLimitOptions};
