use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

static TRACING_INIT: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidConfig {
                message: format!("unsupported log format: {other} (expected text or json)"),
            }),
        }
    }
}

fn build_env_filter_from(teleshare_log: Option<&str>, rust_log: Option<&str>) -> EnvFilter {
    let default = || EnvFilter::new("info");

    if let Some(v) = teleshare_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    if let Some(v) = rust_log {
        return EnvFilter::try_new(v).unwrap_or_else(|_| default());
    }
    default()
}

fn build_env_filter() -> EnvFilter {
    build_env_filter_from(
        std::env::var("TELESHARE_LOG").ok().as_deref(),
        std::env::var("RUST_LOG").ok().as_deref(),
    )
}

/// Installs the global subscriber once; later calls are no-ops.
pub fn init_logging(format: LogFormat) {
    TRACING_INIT.get_or_init(|| {
        let env_filter = build_env_filter();
        let registry = tracing_subscriber::registry().with(env_filter);

        let _ = match format {
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Text => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_precedence_is_teleshare_then_rust_log_then_default() {
        let f1 = build_env_filter_from(Some("debug"), Some("warn"));
        let f2 = build_env_filter_from(None, Some("warn"));
        let f3 = build_env_filter_from(None, None);

        assert_eq!(f1.to_string(), "debug");
        assert_eq!(f2.to_string(), "warn");
        assert_eq!(f3.to_string(), "info");
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" text ".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
