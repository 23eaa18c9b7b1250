// src/mailer/smtp.rs
use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use super::templates::{render, Template, TemplateData};
use super::{MessageId, NotificationTransport, TransportError};

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `"Zanly" <no-reply@example.com>` or a bare address.
    pub from: String,
}

/// STARTTLS relay. The underlying pool is reused across sends.
#[derive(Clone)]
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    host: String,
}

impl SmtpTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, TransportError> {
        let from: Mailbox = config
            .from
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("from {}: {}", config.from, e)))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
            .port(config.port);

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        info!(host = %config.host, port = config.port, "SMTP transport configured");
        Ok(Self {
            mailer: builder.build(),
            from,
            host: config.host.clone(),
        })
    }
}

fn message_id(idempotency_key: &str, host: &str) -> String {
    format!("<{}@{}>", idempotency_key, host)
}

#[async_trait]
impl NotificationTransport for SmtpTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: Template,
        data: &TemplateData,
        idempotency_key: &str,
    ) -> Result<MessageId, TransportError> {
        let to: Mailbox = to
            .parse()
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", to, e)))?;
        let rendered = render(template, data);
        let id = message_id(idempotency_key, &self.host);

        // A redelivered job reuses the Message-ID, so receivers can drop
        // the duplicate.
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .message_id(Some(id.clone()))
            .multipart(MultiPart::alternative_plain_html(rendered.text, rendered.html))
            .map_err(|e| TransportError::Rejected(e.to_string()))?;

        match self.mailer.send(email).await {
            Ok(response) => {
                debug!(code = %response.code(), message_id = %id, "SMTP accepted message");
                Ok(id)
            }
            Err(e) if e.is_permanent() => Err(TransportError::Rejected(e.to_string())),
            Err(e) => Err(TransportError::Unavailable(e.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
