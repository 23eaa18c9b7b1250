// src/queue/job.rs
//! Job payloads and the persisted job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::QueueError;

pub type JobId = String;

/// Every background side effect the system knows how to run. Adding a
/// variant forces the worker's dispatch to handle it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Job {
    SendEmail(EmailJob),
    CleanupExpired(CleanupJob),
}

impl Job {
    pub fn kind(&self) -> &'static str {
        match self {
            Job::SendEmail(_) => "sendEmail",
            Job::CleanupExpired(_) => "cleanupExpired",
        }
    }

    /// Reject payloads that could never succeed, before they are queued.
    pub fn validate(&self) -> Result<(), QueueError> {
        match self {
            Job::SendEmail(email) => email.validate(),
            Job::CleanupExpired(_) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmailType {
    #[serde(rename = "Welcome", alias = "WELCOME")]
    Welcome,
    #[serde(rename = "Login", alias = "LOGIN")]
    Login,
    #[serde(rename = "RESET PASSWORD", alias = "ResetPassword")]
    ResetPassword,
}

impl EmailType {
    pub fn requires_otp(&self) -> bool {
        matches!(self, EmailType::ResetPassword)
    }
}

impl fmt::Display for EmailType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EmailType::Welcome => "Welcome",
            EmailType::Login => "Login",
            EmailType::ResetPassword => "RESET PASSWORD",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailJob {
    pub to: String,
    pub name: String,
    pub email_type: EmailType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

impl EmailJob {
    fn validate(&self) -> Result<(), QueueError> {
        if self.to.trim().is_empty() || self.name.trim().is_empty() {
            return Err(QueueError::InvalidPayload(
                "Missing required email fields".to_string(),
            ));
        }
        if self.to.parse::<lettre::Address>().is_err() {
            return Err(QueueError::InvalidPayload(format!(
                "Invalid recipient address: {}",
                self.to
            )));
        }
        let has_otp = self.otp.as_deref().is_some_and(|o| !o.trim().is_empty());
        if self.email_type.requires_otp() && !has_otp {
            return Err(QueueError::InvalidPayload(format!(
                "{} email requires an OTP",
                self.email_type
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupTarget {
    Notifications,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupJob {
    pub target: CleanupTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Active,
    Retrying,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Retrying => "retrying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `queued -> active -> {completed | retrying -> active | failed}`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Active)
                | (Active, Completed)
                | (Active, Retrying)
                | (Active, Failed)
                | (Retrying, Active)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTransition {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub job: Job,
    pub status: JobStatus,
    /// Times the job has been handed to a worker.
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub history: Vec<JobTransition>,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the job may be claimed.
    pub run_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: Job, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job,
            status: JobStatus::Queued,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            last_error: None,
            history: vec![JobTransition {
                status: JobStatus::Queued,
                at: now,
                error: None,
            }],
            enqueued_at: now,
            run_at: now,
            updated_at: now,
        }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    pub fn transition(
        &mut self,
        next: JobStatus,
        now: DateTime<Utc>,
        error: Option<String>,
    ) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        if next == JobStatus::Active {
            self.attempts += 1;
        }
        if error.is_some() {
            self.last_error = error.clone();
        }
        self.status = next;
        self.updated_at = now;
        self.history.push(JobTransition { status: next, at: now, error });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(kind: EmailType, otp: Option<&str>) -> Job {
        Job::SendEmail(EmailJob {
            to: "student@example.com".into(),
            name: "Ada".into(),
            email_type: kind,
            otp: otp.map(str::to_string),
        })
    }

    #[test]
    fn test_wire_shape() {
        let job = email(EmailType::Login, None);
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "sendEmail");
        assert_eq!(json["emailType"], "Login");
        assert!(json.get("otp").is_none());

        let parsed: Job = serde_json::from_str(
            r#"{"type":"sendEmail","to":"a@b.co","name":"A","emailType":"RESET PASSWORD","otp":"123456"}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind(), "sendEmail");

        let cleanup: Job =
            serde_json::from_str(r#"{"type":"cleanupExpired","target":"notifications"}"#).unwrap();
        assert_eq!(
            cleanup,
            Job::CleanupExpired(CleanupJob { target: CleanupTarget::Notifications })
        );
    }

    #[test]
    fn test_validation() {
        assert!(email(EmailType::Welcome, None).validate().is_ok());
        assert!(email(EmailType::ResetPassword, Some("123456")).validate().is_ok());
        assert!(matches!(
            email(EmailType::ResetPassword, None).validate(),
            Err(QueueError::InvalidPayload(_))
        ));

        let bad = Job::SendEmail(EmailJob {
            to: "not-an-address".into(),
            name: "Ada".into(),
            email_type: EmailType::Welcome,
            otp: None,
        });
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_state_machine() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Active));
        assert!(Retrying.can_transition_to(Active));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Failed.can_transition_to(Retrying));
        assert!(Completed.is_terminal() && Failed.is_terminal());
    }

    #[test]
    fn test_record_history_and_attempts() {
        let now = Utc::now();
        let mut rec = JobRecord::new(email(EmailType::Login, None), 3, now);
        rec.transition(JobStatus::Active, now, None).unwrap();
        rec.transition(JobStatus::Retrying, now, Some("smtp 421".into())).unwrap();
        rec.transition(JobStatus::Active, now, None).unwrap();
        rec.transition(JobStatus::Completed, now, None).unwrap();

        assert_eq!(rec.attempts, 2);
        assert_eq!(rec.last_error.as_deref(), Some("smtp 421"));
        let seq: Vec<_> = rec.history.iter().map(|t| t.status).collect();
        assert_eq!(
            seq,
            vec![
                JobStatus::Queued,
                JobStatus::Active,
                JobStatus::Retrying,
                JobStatus::Active,
                JobStatus::Completed
            ]
        );
        assert!(rec.transition(JobStatus::Active, now, None).is_err());
    }
}
