// src/monitoring/alerting_hooks.rs
//
// Webhook notifications for jobs that exhausted their retries. Fire and
// forget: a failing webhook is logged and never affects the worker.

use serde_json::json;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Default)]
pub struct AlertingHooksConfig {
    /// POST target, from JOB_ALERT_WEBHOOK_URL. Unset means disabled.
    pub webhook_url: Option<String>,
    pub timeout: Duration,
}

impl AlertingHooksConfig {
    pub fn new(webhook_url: Option<String>) -> Self {
        let webhook_url = webhook_url.filter(|u| !u.trim().is_empty());
        if let Some(url) = &webhook_url {
            tracing::info!(webhook_url = %url, "Job failure alerting enabled");
        } else {
            tracing::debug!("Job failure alerting disabled (JOB_ALERT_WEBHOOK_URL not set)");
        }
        Self {
            webhook_url,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct JobFailedEvent {
    pub job_id: String,
    pub job_type: String,
    pub attempts: u32,
    pub error: String,
    /// Unix seconds.
    pub timestamp: u64,
}

impl JobFailedEvent {
    pub fn new(job_id: &str, job_type: &str, attempts: u32, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            job_type: job_type.to_string(),
            attempts,
            error: error.to_string(),
            timestamp: current_timestamp(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "event": "job_failed",
            "job_id": self.job_id,
            "job_type": self.job_type,
            "attempts": self.attempts,
            "error": self.error,
            "timestamp": self.timestamp,
        })
    }
}

/// Spawns the POST and returns immediately.
pub fn send_alert(config: &AlertingHooksConfig, event: JobFailedEvent) {
    let Some(webhook_url) = config.webhook_url.clone() else {
        tracing::debug!(job_id = %event.job_id, "Alerting disabled, skipping webhook");
        return;
    };
    let timeout = config.timeout;
    let payload = event.to_json();

    tokio::spawn(async move {
        match send_webhook(&webhook_url, &payload, timeout).await {
            Ok(()) => tracing::info!(
                webhook_url = %webhook_url,
                job_id = %event.job_id,
                "Job failure alert sent"
            ),
            Err(e) => tracing::warn!(
                webhook_url = %webhook_url,
                job_id = %event.job_id,
                error = %e,
                "Failed to send job failure alert (non-fatal)"
            ),
        }
    });
}

async fn send_webhook(
    url: &str,
    payload: &serde_json::Value,
    timeout: Duration,
) -> Result<(), reqwest::Error> {
    reqwest::Client::new()
        .post(url)
        .json(payload)
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
