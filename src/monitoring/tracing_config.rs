//! Structured logging with tracing
//!
//! Sets up:
//! - Console logging, text or JSON
//! - Optional JSON file logging with daily rotation

use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::{LogFormat, MonitoringConfig};

/// Initialize the global subscriber.
///
/// Returns the file writer guard when file logging is on; keep it alive for
/// the life of the process or buffered lines are lost. Calling this twice is
/// harmless, the second registration is ignored.
pub fn init_tracing(config: &MonitoringConfig) -> std::io::Result<Option<WorkerGuard>> {
    config.ensure_log_dir()?;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let (text_layer, json_layer) = match config.log_format {
        LogFormat::Text => (
            Some(fmt::layer().with_writer(std::io::stderr).with_target(true)),
            None,
        ),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let (writer, guard) = non_blocking(daily(dir, format!("{}.log", config.service_name)));
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(text_layer)
        .with(json_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_initialization() {
        let config = MonitoringConfig::default();
        let guard = init_tracing(&config).unwrap();
        assert!(guard.is_none());
    }
}
