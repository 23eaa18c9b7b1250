//! Logging configuration
//!
//! Populated by [`crate::config::ApiConfig`] from:
//! - RUST_LOG / LOG_LEVEL: filter directive (default: info)
//! - LOG_FORMAT: console format, json or text (default: text)
//! - LOG_DIR: when set, also write daily-rotated JSON logs there

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Fallback filter when RUST_LOG is unset
    pub log_level: String,

    pub log_format: LogFormat,

    /// File logging is off when `None`
    pub log_dir: Option<PathBuf>,

    /// Stamped on every log line and the app_info gauge
    pub service_name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("json") {
            Ok(LogFormat::Json)
        } else if s.trim().eq_ignore_ascii_case("text") {
            Ok(LogFormat::Text)
        } else {
            Err(format!("expected json or text, got {:?}", s))
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            log_dir: None,
            service_name: env!("APP_SERVICE_DEFAULT").to_string(),
        }
    }
}

impl MonitoringConfig {
    /// Create the log directory if file logging is on.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        let Some(dir) = &self.log_dir else {
            return Ok(());
        };
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
            }
        }
        Ok(())
    }
}
