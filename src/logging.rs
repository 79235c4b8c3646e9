//! Logging initialization.
//!
//! - `pretty`: human-readable lines for interactive use
//! - `json`: one JSON object per event for log aggregation
//!
//! `RUST_LOG` overrides the default `info` filter. Logs go to stderr so
//! command output on stdout stays machine-readable.

use std::str::FromStr;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::domain::error::StratlabError;
use crate::ports::config_port::ConfigPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = StratlabError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(StratlabError::ConfigInvalid {
                section: "logging".to_string(),
                key: "format".to_string(),
                reason: format!("expected pretty or json, got '{other}'"),
            }),
        }
    }
}

impl LogFormat {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratlabError> {
        config
            .get_string("logging", "format")
            .map_or(Ok(Self::default()), |raw| raw.parse())
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };
    if installed.is_err() {
        tracing::debug!("logging already initialized");
    }
}
