use crate::config::ConfigError;
use chrono::Timelike;
use std::str::FromStr;
use tracing_subscriber::filter::{Directive, LevelFilter};
use tracing_subscriber::fmt::{format::Writer, time::FormatTime};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct SystemTime;

impl FormatTime for SystemTime {
    fn format_time(&self, w: &mut Writer<'_>) -> core::fmt::Result {
        let time = chrono::prelude::Local::now();
        write!(
            w,
            "{:02}:{:02}:{:02}.{:03}",
            time.hour() % 24,
            time.minute(),
            time.second(),
            time.timestamp_subsec_millis()
        )
    }
}

/// Accepts tracing level names plus `warning` and `critical`.
pub fn level_filter(level: &str) -> Result<LevelFilter, ConfigError> {
    let level = level.trim().to_ascii_lowercase();
    let name = match level.as_str() {
        "warning" => "warn",
        "critical" => "error",
        other => other,
    };
    LevelFilter::from_str(name)
        .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", level)))
}

/// Filters with `segproxy=<level>` unless `RUST_LOG` is set.
pub fn init_tracing(level: &str) -> Result<(), ConfigError> {
    let directive = Directive::from_str(&format!("segproxy={}", level_filter(level)?))
        .map_err(|_| ConfigError::Invalid("tracing filter".to_string()))?;
    let stdout_layer = fmt::layer()
        .compact()
        .with_writer(std::io::stdout)
        .with_timer(SystemTime);
    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| ConfigError::Invalid(format!("tracing init: {}", e)))
}
