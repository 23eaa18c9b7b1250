// src/queue/handlers.rs
//! Dispatch from job payload to side effect.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use super::job::{CleanupJob, CleanupTarget, EmailJob, Job, JobRecord};
use super::worker::{JobError, JobHandler};
use crate::cache::{InvalidationCoordinator, Resource, Scope};
use crate::db::{NotificationStore, StoreError};
use crate::mailer::templates::{subject, Template, TemplateData};
use crate::mailer::{NotificationTransport, TransportError};

pub struct SideEffectHandler {
    transport: Arc<dyn NotificationTransport>,
    notifications: Arc<dyn NotificationStore>,
    invalidator: InvalidationCoordinator,
    app_name: String,
}

impl SideEffectHandler {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        notifications: Arc<dyn NotificationStore>,
        invalidator: InvalidationCoordinator,
        app_name: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            notifications,
            invalidator,
            app_name: app_name.into(),
        }
    }

    async fn send_email(&self, job_id: &str, email: &EmailJob) -> Result<(), JobError> {
        let template = Template::for_email(email.email_type);
        let data = TemplateData {
            name: email.name.clone(),
            otp: email.otp.clone(),
            app_name: self.app_name.clone(),
        };
        let subject = subject(template, &data);

        let message_id = self
            .transport
            .send(&email.to, &subject, template, &data, job_id)
            .await
            .map_err(|e| match e {
                e if e.is_permanent() => JobError::Permanent(e.to_string()),
                TransportError::Unavailable(msg) => JobError::Transient(msg),
                other => JobError::Transient(other.to_string()),
            })?;

        info!(
            job_id,
            to = %email.to,
            email_type = %email.email_type,
            message_id = %message_id,
            transport = self.transport.name(),
            "Email sent"
        );
        Ok(())
    }

    async fn cleanup(&self, job: &CleanupJob) -> Result<(), JobError> {
        match job.target {
            CleanupTarget::Notifications => {
                let removed = self
                    .notifications
                    .delete_expired(Utc::now())
                    .await
                    .map_err(store_error)?;
                if removed > 0 {
                    self.invalidator
                        .invalidate(Resource::Notifications, Scope::Listings)
                        .await;
                }
                info!(removed, "Expired notifications cleaned up");
                Ok(())
            }
        }
    }
}

fn store_error(e: StoreError) -> JobError {
    JobError::Transient(e.to_string())
}

#[async_trait]
impl JobHandler for SideEffectHandler {
    async fn handle(&self, record: &JobRecord) -> Result<(), JobError> {
        match &record.job {
            Job::SendEmail(email) => self.send_email(&record.id, email).await,
            Job::CleanupExpired(cleanup) => self.cleanup(cleanup).await,
        }
    }
}
