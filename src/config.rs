// src/config.rs
//! Process configuration, read once from the environment (and `.env`).
//!
//! Absent variables take the defaults below. A variable that is present but
//! unparsable is an error rather than a silent default.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::db::MaterialStatus;
use crate::mailer::SmtpConfig;
use crate::monitoring::alerting_hooks::AlertingHooksConfig;
use crate::monitoring::config::{LogFormat, MonitoringConfig};
use crate::monitoring::rate_limit_middleware::RateLimitOptions;
use crate::policy::OnUnavailable;
use crate::queue::{RetryPolicy, WorkerConfig};
use crate::rag::llm_provider::{LLMConfig, GEMINI_BASE_URL};
use crate::rag::RagConfig;
use crate::security::rate_limiter::RateLimiterConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("missing required setting {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// In-process cache when unset.
    pub redis_url: Option<String>,
    pub default_ttl: Duration,
    pub op_timeout: Duration,
    pub connect_timeout: Duration,
    pub memory_capacity: usize,
    /// What reads do when the cache is down. Open serves from the store.
    pub on_unavailable: OnUnavailable,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// In-process queue when unset. Falls back to `REDIS_URL`.
    pub redis_url: Option<String>,
    pub namespace: String,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct MailSettings {
    /// Emails are logged instead of sent when unset.
    pub smtp: Option<SmtpConfig>,
    pub app_name: String,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub server: ServerSettings,
    pub cache: CacheSettings,
    pub rate_limit: RateLimiterConfig,
    pub rate_limit_options: RateLimitOptions,
    pub queue: QueueSettings,
    pub worker: WorkerConfig,
    pub cleanup_interval: Duration,
    pub alerts: AlertingHooksConfig,
    pub llm: LLMConfig,
    pub rag: RagConfig,
    pub mail: MailSettings,
    pub database_path: PathBuf,
    pub database_timeout: Duration,
    pub monitoring: MonitoringConfig,
}

/// Reads one variable; blank counts as absent.
struct Env<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                value: raw.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key).map(|v| v.to_lowercase()) {
            None => Ok(default),
            Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
            Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
            Some(v) => Err(ConfigError::Invalid {
                key,
                value: v,
                reason: "expected true or false".to_string(),
            }),
        }
    }

    fn millis(&self, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default_ms).map(Duration::from_millis)
    }

    fn secs(&self, key: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
        self.parse(key, default_secs).map(Duration::from_secs)
    }
}

impl ApiConfig {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let server = ServerSettings {
            host: env.string("HOST", "127.0.0.1"),
            port: env.parse("PORT", 3000u16)?,
            cors_origin: env.get("CORS_ORIGIN"),
            workers: env.get("HTTP_WORKERS").map(|_| env.parse("HTTP_WORKERS", 1usize)).transpose()?,
        };

        let redis_url = env.get("REDIS_URL");
        let cache = CacheSettings {
            redis_url: redis_url.clone(),
            default_ttl: env.secs("CACHE_TTL", 300)?,
            op_timeout: env.millis("CACHE_OP_TIMEOUT_MS", 250)?,
            connect_timeout: env.millis("REDIS_CONNECT_TIMEOUT_MS", 2_000)?,
            memory_capacity: env.parse("CACHE_MEMORY_CAPACITY", 10_000usize)?,
            on_unavailable: env.parse("CACHE_ON_UNAVAILABLE", OnUnavailable::FailOpen)?,
        };

        let rate_limit = RateLimiterConfig {
            enabled: env.flag("RATE_LIMIT_ENABLED", true)?,
            window: env.millis("RATE_LIMIT_TIME", 15 * 60 * 1000)?,
            max_requests: env.parse("RATE_LIMIT_MAX_REQ", 100u64)?,
            on_unavailable: env.parse("RATE_LIMIT_ON_UNAVAILABLE", OnUnavailable::FailClosed)?,
        };
        if rate_limit.window.is_zero() {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_TIME",
                value: "0".to_string(),
                reason: "window must be positive".to_string(),
            });
        }

        let defaults = RateLimitOptions::default();
        let exempt_prefixes = match env.get("RATE_LIMIT_EXEMPT_PREFIXES") {
            None => defaults.exempt_prefixes,
            Some(raw) => serde_json::from_str::<Vec<String>>(&raw).map_err(|e| ConfigError::Invalid {
                key: "RATE_LIMIT_EXEMPT_PREFIXES",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
        };
        let rate_limit_options = RateLimitOptions {
            trust_proxy: env.flag("TRUST_PROXY", false)?,
            message: env.string("RATE_LIMIT_MESSAGE", &defaults.message),
            exempt_prefixes,
        };

        let queue = QueueSettings {
            redis_url: env.get("QUEUE_REDIS_URL").or(redis_url),
            namespace: env.string("QUEUE_NAMESPACE", "zanly:jobs"),
            max_attempts: env.parse("JOB_MAX_ATTEMPTS", 3u32)?.max(1),
        };

        let worker_defaults = WorkerConfig::default();
        let retry_defaults = RetryPolicy::default();
        let worker = WorkerConfig {
            concurrency: env.parse("WORKER_CONCURRENCY", worker_defaults.concurrency)?,
            poll_interval: env.millis(
                "WORKER_POLL_INTERVAL_MS",
                worker_defaults.poll_interval.as_millis() as u64,
            )?,
            job_timeout: env.millis("JOB_TIMEOUT_MS", worker_defaults.job_timeout.as_millis() as u64)?,
            lease: env.millis("JOB_LEASE_MS", worker_defaults.lease.as_millis() as u64)?,
            retry: RetryPolicy {
                base_delay: env.millis("JOB_RETRY_BASE_MS", retry_defaults.base_delay.as_millis() as u64)?,
                max_delay: env.millis("JOB_RETRY_MAX_MS", retry_defaults.max_delay.as_millis() as u64)?,
            },
        };

        let app_name = env.string("APP_NAME", "Zanly");

        let model = env.get("LLM_MODEL");
        let llm = match env.string("LLM_PROVIDER", "gemini").to_lowercase().as_str() {
            "gemini" => LLMConfig::Gemini {
                api_key: env.get("GEMINI_API_KEY").unwrap_or_default(),
                model: model.unwrap_or_else(|| "gemini-2.5-flash".to_string()),
                base_url: env.string("GEMINI_BASE_URL", GEMINI_BASE_URL),
            },
            "ollama" => LLMConfig::Ollama {
                ollama_url: env.string("OLLAMA_URL", "http://127.0.0.1:11434"),
                model: model.unwrap_or_else(|| "llama3.2".to_string()),
            },
            other => {
                return Err(ConfigError::Invalid {
                    key: "LLM_PROVIDER",
                    value: other.to_string(),
                    reason: "expected gemini or ollama".to_string(),
                })
            }
        };

        let rag_defaults = RagConfig::default();
        let visibility = match env.get("RAG_VISIBILITY_STATUS") {
            None => rag_defaults.visibility,
            Some(raw) => raw.parse::<MaterialStatus>().map_err(|reason| ConfigError::Invalid {
                key: "RAG_VISIBILITY_STATUS",
                value: raw.clone(),
                reason,
            })?,
        };
        let rag = RagConfig {
            app_name: app_name.clone(),
            visibility,
            search_limit: env.parse("RAG_SEARCH_LIMIT", rag_defaults.search_limit)?,
            temperature: env.parse("LLM_TEMPERATURE", rag_defaults.temperature)?,
            max_output_tokens: env.parse("LLM_MAX_OUTPUT_TOKENS", rag_defaults.max_output_tokens)?,
            cache_ttl: env.secs("RAG_CACHE_TTL", rag_defaults.cache_ttl.as_secs())?,
            model_timeout: env.millis("LLM_TIMEOUT_MS", rag_defaults.model_timeout.as_millis() as u64)?,
            fallback_message: env.string("RAG_FALLBACK_MESSAGE", &rag_defaults.fallback_message),
        };

        let smtp = match env.get("SMTP_HOST") {
            None => None,
            Some(host) => Some(SmtpConfig {
                host,
                port: env.parse("SMTP_PORT", 587u16)?,
                username: env.get("SMTP_USER"),
                password: env.get("SMTP_PASS"),
                from: env.get("SMTP_FROM").ok_or(ConfigError::Missing("SMTP_FROM"))?,
            }),
        };

        let monitoring_defaults = MonitoringConfig::default();
        let monitoring = MonitoringConfig {
            log_level: env.string("LOG_LEVEL", &monitoring_defaults.log_level),
            log_format: env.parse("LOG_FORMAT", LogFormat::Text)?,
            log_dir: env.get("LOG_DIR").map(PathBuf::from),
            service_name: env.string("APP_SERVICE", &monitoring_defaults.service_name),
        };

        Ok(Self {
            server,
            cache,
            rate_limit,
            rate_limit_options,
            queue,
            worker,
            cleanup_interval: env.secs("CLEANUP_INTERVAL_SECS", 3600)?,
            alerts: AlertingHooksConfig::new(env.get("JOB_ALERT_WEBHOOK_URL")),
            llm,
            rag,
            mail: MailSettings { smtp, app_name },
            database_path: PathBuf::from(env.string("DATABASE_PATH", "zanly.db")),
            database_timeout: env.millis("DATABASE_TIMEOUT_MS", 5_000)?,
            monitoring,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
