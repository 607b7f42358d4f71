//! Logging initialization
//!
//! Installs a `tracing` subscriber with an env-filter and either a
//! human-readable or JSON formatter. `RUST_LOG` overrides the configured
//! filter when set.

use serde::Deserialize;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default directives when neither `RUST_LOG` nor a filter is given
pub const DEFAULT_FILTER: &str = "info,vanlink=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives did not parse
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format for log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Configuration for logging initialization
#[derive(Clone, Debug)]
pub struct LogConfig {
    /// Filter directives, e.g. `info,vanlink=debug`
    pub filter: Option<String>,
    /// Line format
    pub format: LogFormat,
    /// Colorize text output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            format: LogFormat::Text,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Resolve the env-filter: `RUST_LOG`, then the configured filter, then the default
    pub fn env_filter(&self) -> Result<EnvFilter, TelemetryError> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        let directives = self.filter.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directives).map_err(|e| TelemetryError::Filter(e.to_string()))
    }
}

/// Install the global subscriber
pub fn init_logging(config: &LogConfig) -> Result<(), TelemetryError> {
    let env_filter = config.env_filter()?;

    let init = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(config.ansi)
                    .with_target(false),
            )
            .try_init(),
    };
    init.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_text_with_color() {
        let config = LogConfig::default();
        assert_eq!(config.format, LogFormat::Text);
        assert!(config.ansi);
        assert!(config.filter.is_none());
    }

    #[test]
    fn bad_filter_is_rejected() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            filter: Some("vanlink=notalevel".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.env_filter(), Err(TelemetryError::Filter(_))));
    }

    #[test]
    fn format_parses_lowercase() {
        let format: LogFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, LogFormat::Json);
    }
}
