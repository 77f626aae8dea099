//! Tracing initialization with configurable logging formats.

use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig, ObservabilityConfig};

/// Initialize the global tracing subscriber.
///
/// This sets up:
/// - Console logging with configurable format (pretty, compact, JSON)
/// - Environment-based log filtering (`RUST_LOG` wins over the config)
pub fn init_tracing(config: &ObservabilityConfig) -> Result<(), TracingError> {
    let logging = &config.logging;
    let filter = build_env_filter(logging);

    // Logs go to stderr so the JSON run report on stdout stays machine-readable
    let fmt_layer = match (logging.format, logging.timestamps) {
        (LogFormat::Pretty, true) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Pretty, false) => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Compact, true) => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Compact, false) => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Json, true) => tracing_subscriber::fmt::layer()
            .json()
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_current_span(logging.include_spans)
            .with_writer(std::io::stderr)
            .boxed(),
        (LogFormat::Json, false) => tracing_subscriber::fmt::layer()
            .json()
            .with_file(logging.file_line)
            .with_line_number(logging.file_line)
            .with_current_span(logging.include_spans)
            .without_time()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TracingError::Init(e.to_string()))
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let base_level = config.level.as_str();

    if let Ok(env_filter) = std::env::var("RUST_LOG") {
        EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else if let Some(filter) = &config.filter {
        let combined = format!("{},{}", base_level, filter);
        EnvFilter::try_new(combined).unwrap_or_else(|_| EnvFilter::new(base_level))
    } else {
        // Default filter that quiets noisy HTTP crates
        EnvFilter::new(format!(
            "{},hyper=warn,hyper_util=warn,h2=warn,reqwest=warn",
            base_level
        ))
    }
}

/// Tracing initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum TracingError {
    #[error("Failed to initialize tracing: {0}")]
    Init(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_filter_from_level() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                level: LogLevel::Debug,
                ..Default::default()
            };
            let filter = build_env_filter(&config).to_string();
            assert!(filter.contains("debug"));
            assert!(filter.contains("reqwest=warn"));
        });
    }

    #[test]
    fn test_filter_directives_appended() {
        temp_env::with_var_unset("RUST_LOG", || {
            let config = LoggingConfig {
                filter: Some("spendcast=trace".into()),
                ..Default::default()
            };
            let filter = build_env_filter(&config).to_string();
            assert!(filter.contains("spendcast=trace"));
        });
    }

    #[test]
    fn test_rust_log_wins() {
        temp_env::with_var("RUST_LOG", Some("error"), || {
            let config = LoggingConfig {
                filter: Some("spendcast=trace".into()),
                ..Default::default()
            };
            let filter = build_env_filter(&config).to_string();
            assert!(!filter.contains("spendcast=trace"));
        });
    }
}
