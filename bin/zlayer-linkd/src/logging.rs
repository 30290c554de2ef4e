//! Log subscriber setup

use clap::ValueEnum;
use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogFormat {
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// JSON format for log aggregation
    Json,
    /// Compact format (single line)
    Compact,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Filter used when `RUST_LOG` is not set
fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(level.as_str())
}

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over `level`. Logs go to stderr; stdout
/// carries the daemon's result.
pub(crate) fn init_logging(level: LogLevel, format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level));

    // Separate branches because each formatter is its own layer type
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(io::stderr).pretty())
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_ansi(false)
                        .json(),
                )
                .init();
        }
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_writer(io::stderr)
                        .with_target(false)
                        .compact(),
                )
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::default().as_str(), "info");
        assert_eq!(LogLevel::Trace.as_str(), "trace");
        assert_eq!(default_filter(LogLevel::Warn).to_string(), "warn");
    }

    #[test]
    fn test_value_enum_names() {
        assert_eq!(
            LogFormat::from_str("json", true).unwrap(),
            LogFormat::Json
        );
        assert_eq!(LogLevel::from_str("DEBUG", true).unwrap(), LogLevel::Debug);
    }
}
