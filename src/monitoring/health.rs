//! Health reporting
//!
//! `GET /health` probes the cache, the job queue and the store on every
//! call. The store is the source of truth: if it is down the service is
//! unhealthy. Losing the cache or the queue only degrades it.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentStatus::Healthy => write!(f, "healthy"),
            ComponentStatus::Degraded => write!(f, "degraded"),
            ComponentStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl ComponentStatus {
    pub fn from_probe<E>(result: &Result<(), E>) -> Self {
        if result.is_ok() {
            ComponentStatus::Healthy
        } else {
            ComponentStatus::Unhealthy
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub database: ComponentStatus,
    pub cache: ComponentStatus,
    pub queue: ComponentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ComponentStatus,
    pub ready: bool,
    pub timestamp: String,
    pub uptime_seconds: f64,
    pub components: ComponentHealth,
    pub version: String,
}

impl HealthStatus {
    pub fn is_serving(&self) -> bool {
        self.ready && self.status != ComponentStatus::Unhealthy
    }
}

/// Tracks application readiness and folds probe results into one status.
pub struct HealthTracker {
    is_ready: AtomicBool,
    startup_time: std::time::Instant,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            is_ready: AtomicBool::new(false),
            startup_time: std::time::Instant::now(),
        }
    }

    /// Call once the server is bound and background tasks are running.
    pub fn mark_ready(&self) {
        self.is_ready.store(true, Ordering::SeqCst);
        tracing::info!(
            startup_ms = self.startup_time.elapsed().as_millis() as u64,
            "System marked as ready"
        );
    }

    pub fn mark_not_ready(&self) {
        self.is_ready.store(false, Ordering::SeqCst);
        tracing::warn!("System marked as not ready");
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    pub fn evaluate(&self, components: ComponentHealth) -> HealthStatus {
        let status = if components.database == ComponentStatus::Unhealthy {
            ComponentStatus::Unhealthy
        } else if components.cache != ComponentStatus::Healthy
            || components.queue != ComponentStatus::Healthy
            || components.database != ComponentStatus::Healthy
        {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        };

        HealthStatus {
            status,
            ready: self.is_ready(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.startup_time.elapsed().as_secs_f64(),
            components,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all(status: ComponentStatus) -> ComponentHealth {
        ComponentHealth {
            database: status,
            cache: status,
            queue: status,
        }
    }

    #[test]
    fn test_mark_ready() {
        let tracker = HealthTracker::new();
        assert!(!tracker.is_ready());
        tracker.mark_ready();
        assert!(tracker.is_ready());
        tracker.mark_not_ready();
        assert!(!tracker.is_ready());
    }

    #[test]
    fn test_overall_health_calculation() {
        let tracker = HealthTracker::new();
        tracker.mark_ready();

        assert_eq!(tracker.evaluate(all(ComponentStatus::Healthy)).status, ComponentStatus::Healthy);

        let mut c = all(ComponentStatus::Healthy);
        c.cache = ComponentStatus::Unhealthy;
        let status = tracker.evaluate(c);
        assert_eq!(status.status, ComponentStatus::Degraded);
        assert!(status.is_serving());

        let mut c = all(ComponentStatus::Healthy);
        c.database = ComponentStatus::Unhealthy;
        let status = tracker.evaluate(c);
        assert_eq!(status.status, ComponentStatus::Unhealthy);
        assert!(!status.is_serving());
    }

    #[test]
    fn test_probe_mapping() {
        assert_eq!(ComponentStatus::from_probe::<()>(&Ok(())), ComponentStatus::Healthy);
        assert_eq!(ComponentStatus::from_probe(&Err("down")), ComponentStatus::Unhealthy);
    }
}
