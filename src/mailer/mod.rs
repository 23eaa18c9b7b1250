// src/mailer/mod.rs
//! Outbound notification transport used by the job worker.

pub mod smtp;
pub mod templates;

pub use smtp::{SmtpConfig, SmtpTransport};
pub use templates::{Rendered, Template, TemplateData};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

pub type MessageId = String;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    /// Retrying the same message cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TransportError::InvalidAddress(_) | TransportError::Rejected(_))
    }
}

#[async_trait]
pub trait NotificationTransport: Send + Sync {
    /// Send one rendered message. `idempotency_key` is stable across
    /// redeliveries of the same job, so providers that dedupe can use it.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: Template,
        data: &TemplateData,
        idempotency_key: &str,
    ) -> Result<MessageId, TransportError>;

    fn name(&self) -> &'static str;
}

/// Logs instead of sending. Used when SMTP is not configured.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: Template,
        _data: &TemplateData,
        idempotency_key: &str,
    ) -> Result<MessageId, TransportError> {
        info!(to, subject, template = ?template, idempotency_key, "email not sent (SMTP not configured)");
        Ok(format!("log-{}", idempotency_key))
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
