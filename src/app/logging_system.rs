use thiserror::Error;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use super::config::{LogFormat, LogLevel};

/// Transport crates that are noisy at debug level.
const QUIET_TARGETS: &[&str] = &["hyper", "hyper_util", "reqwest", "h2", "rustls"];

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {details}")]
    InvalidFilter { filter: String, details: String },
    #[error("Failed to install tracing subscriber: {0}")]
    InitFailed(String),
}

pub fn build_filter_string(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(level.as_str().to_string());
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    parts.join(",")
}

/// Installs the global subscriber. `RUST_LOG` overrides `level` when set.
pub fn setup_logging(level: LogLevel, format: LogFormat) -> Result<(), LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let filter_string = build_filter_string(level);
            EnvFilter::try_new(&filter_string).map_err(|e| LoggingError::InvalidFilter {
                filter: filter_string,
                details: e.to_string(),
            })?
        }
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_target(true).with_level(true).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false),
            )
            .try_init(),
    };
    result.map_err(|e| LoggingError::InitFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_string_quiets_transport_crates() {
        let filter = build_filter_string(LogLevel::Debug);
        assert!(filter.starts_with("debug,"));
        assert!(filter.contains("reqwest=warn"));
        assert!(filter.contains("hyper=warn"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }
}
