//! Process-wide tracing setup.

use crate::tracing_layer::SessionEventLayer;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uipilot_core::config::LoggingConfig;
use uipilot_core::error::{PilotError, Result};

const LOG_FILE_PREFIX: &str = "uipilot.log";

/// Builds the level filter. `RUST_LOG` wins over the configured level; an
/// unparsable configured level falls back to `info`.
pub fn level_filter(level: &str, rust_log: Option<&str>) -> EnvFilter {
    if let Some(filter) = rust_log.and_then(|directives| EnvFilter::try_new(directives).ok()) {
        return filter;
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: stderr output (plain or JSON), an
/// optional daily-rolling file and an optional session event feed.
///
/// # Errors
///
/// Fails if the log directory cannot be created or a global subscriber is
/// already installed.
pub fn init_tracing(config: &LoggingConfig, events: Option<SessionEventLayer>) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = level_filter(&config.level, rust_log.as_deref());

    let plain = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });
    let json = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });

    let file = match &config.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(rolling::daily(dir, LOG_FILE_PREFIX))
                    .with_ansi(false)
                    .with_target(true)
                    .with_thread_ids(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file)
        .with(events)
        .try_init()
        .map_err(|e| PilotError::internal(format!("Failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rust_log_overrides_configured_level() {
        assert_eq!(level_filter("info", Some("debug")).to_string(), "debug");
        assert_eq!(level_filter("warn", None).to_string(), "warn");
    }

    #[test]
    fn bad_level_falls_back_to_info() {
        assert_eq!(level_filter("uipilot=verbose", None).to_string(), "info");
        assert_eq!(level_filter("warn", Some("uipilot=verbose")).to_string(), "warn");
    }
}
