//! Logging system configuration and initialization
//!
//! - Console output with timestamps in the store's fixed time zone
//! - Optional file output (plain or JSON) through a non-blocking writer
//! - Noisy dependency targets are quieted unless the level is `trace`
//! - `RUST_LOG` overrides the configured filter entirely

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Utc};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::database_paths::app_data_dir;

// Keeps the file writer alive for the life of the process
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> = Mutex::new(Vec::new());
}

/// Renders log timestamps in a fixed offset (KST by default)
#[derive(Debug, Clone, Copy)]
pub struct FixedOffsetTimer {
    offset: FixedOffset,
}

impl FixedOffsetTimer {
    pub const fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl FormatTime for FixedOffsetTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let now = Utc::now().with_timezone(&self.offset);
        write!(w, "{}", now.format("%Y-%m-%d %H:%M:%S%.3f %:z"))
    }
}

/// Directory log files go to when none is configured
pub fn default_log_directory() -> PathBuf {
    app_data_dir().join("logs")
}

/// Filter used when `RUST_LOG` is not set
pub fn build_filter(level: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(level).map_err(|e| anyhow!("Invalid log level {level:?}: {e}"))?;

    if !level.to_lowercase().contains("trace") {
        for directive in ["sqlx=warn", "reqwest=info", "hyper=warn", "hyper_util=warn", "h2=warn", "html5ever=warn"] {
            filter = filter.add_directive(directive.parse()?);
        }
    }
    Ok(filter)
}

/// Initialize the global subscriber. Call once at startup.
pub fn init_logging(config: &LoggingConfig, offset: FixedOffset) -> Result<()> {
    if !config.console_output && !config.file_output {
        return Err(anyhow!("No logging output configured"));
    }

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => build_filter(&config.level)?,
    };
    let timer = FixedOffsetTimer::new(offset);

    let console_layer = config.console_output.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(timer)
            .with_target(false)
    });

    let mut log_path = None;
    let file_layer = if config.file_output {
        let log_dir = config.log_dir.clone().unwrap_or_else(default_log_directory);
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

        let (writer, guard) = non_blocking(rolling::daily(&log_dir, &config.file_name));
        LOG_GUARDS.lock().unwrap_or_else(PoisonError::into_inner).push(guard);
        log_path = Some(log_dir.join(&config.file_name));

        let layer = if config.json_format {
            fmt::Layer::new()
                .json()
                .with_writer(writer)
                .with_timer(timer)
                .with_target(true)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::Layer::new()
                .with_writer(writer)
                .with_timer(timer)
                .with_target(false)
                .with_ansi(false)
                .boxed()
        };
        Some(layer)
    } else {
        None
    };

    Registry::default()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    info!("📝 Logging initialized (level {}, json {})", config.level, config.json_format);
    if let Some(path) = log_path {
        info!("📁 Log file: {:?}", path);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiets_dependencies_below_trace() {
        let filter = build_filter("debug").unwrap().to_string();
        assert!(filter.contains("sqlx=warn"));
        assert!(filter.contains("reqwest=info"));

        let trace = build_filter("trace").unwrap().to_string();
        assert!(!trace.contains("sqlx"));
    }

    #[test]
    fn rejects_unparsable_levels() {
        assert!(build_filter("crawler=loudest").is_err());
    }

    #[test]
    fn no_output_is_a_configuration_error() {
        let config = LoggingConfig {
            console_output: false,
            file_output: false,
            ..LoggingConfig::default()
        };
        let offset = FixedOffset::east_opt(0).unwrap();
        assert!(init_logging(&config, offset).is_err());
    }
}
