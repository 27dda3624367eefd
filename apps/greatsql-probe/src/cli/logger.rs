//! # Logger Module
//!
//! Logging is built from `tracing-subscriber` layers:
//! - **EnvFilter**: `RUST_LOG` overrides the configured level, e.g.
//!   `RUST_LOG=greatsql_probe::infrastructure=debug`
//! - **Format layer**: either the legacy line format (default) or the native tracing format
//!
//! ## Formats
//! - **Legacy** (default)
//!   - Text: `[timestamp LEVEL - target] message`
//!   - JSON: `{"timestamp": "...", "severity": "INFO", "target": "...", "message": "..."}`
//! - **Modern**: tracing-subscriber's own formatting, enabled with
//!   `PROBE_LOGGER__USE_TRACING_FORMAT=true`
//!
//! Logs go to a daily file in `~/.greatsql-probe/` unless `PROBE_LOGGER__STDOUT=true`.
//! Files older than 7 days are removed at startup.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: standard filter directives
//! - `PROBE_LOGGER__LEVEL`: DEBUG, INFO, WARN or ERROR
//! - `PROBE_LOGGER__STDOUT`: log to stdout instead of the file (default: `false`)
//! - `PROBE_LOGGER__FORMAT`: Text or Json (default: Text)
//! - `PROBE_LOGGER__USE_TRACING_FORMAT`: opt in to the modern format (default: `false`)

use serde::Deserialize;
use std::fmt;
use std::io::Write;
use std::time::{Duration, SystemTime};
use tracing::field::{Field, Visit};
use tracing::{warn, Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use super::settings::user_directory;

const LOG_FILE_PREFIX: &str = "probe.log";
const LOG_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum LoggerLevel {
    #[serde(alias = "DEBUG", alias = "debug")]
    Debug,
    #[serde(alias = "INFO", alias = "info")]
    Info,
    #[serde(alias = "WARN", alias = "warn")]
    Warn,
    #[serde(alias = "ERROR", alias = "error")]
    Error,
}

impl LoggerLevel {
    pub fn to_tracing_level(&self) -> LevelFilter {
        match self {
            LoggerLevel::Debug => LevelFilter::DEBUG,
            LoggerLevel::Info => LevelFilter::INFO,
            LoggerLevel::Warn => LevelFilter::WARN,
            LoggerLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub enum LogFormat {
    #[serde(alias = "JSON", alias = "json")]
    Json,
    #[serde(alias = "TEXT", alias = "text")]
    Text,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LoggerSettings {
    #[serde(default = "default_log_level")]
    pub level: LoggerLevel,
    #[serde(default)]
    pub stdout: bool,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub use_tracing_format: bool,
}

fn default_log_level() -> LoggerLevel {
    LoggerLevel::Info
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggerSettings {
    fn default() -> Self {
        LoggerSettings {
            level: default_log_level(),
            stdout: false,
            format: default_log_format(),
            use_tracing_format: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoggerError {
    #[error("Failed to install the log subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

// Failures only warn: housekeeping must never stop the CLI from starting.
fn clean_old_logs() {
    let Some(cut_off) = SystemTime::now().checked_sub(LOG_RETENTION) else {
        return;
    };

    let Ok(dir) = user_directory().read_dir() else {
        warn!("Failed to read the log directory {:?}", user_directory());
        return;
    };

    for entry in dir.flatten() {
        let is_log = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX));
        if !is_log {
            continue;
        }
        match entry.metadata().and_then(|md| md.modified()) {
            Ok(modified) if modified < cut_off => {
                let _ = std::fs::remove_file(entry.path());
            }
            Ok(_) => {}
            Err(e) => warn!(
                "Failed to read modification time for {:?}. {}",
                entry.path(),
                e
            ),
        }
    }
}

/// Layer that writes the legacy one-line-per-event format
struct LegacyFormatLayer<W> {
    writer: W,
    format: LogFormat,
}

impl<W> LegacyFormatLayer<W> {
    fn new(writer: W, format: LogFormat) -> Self {
        Self { writer, format }
    }

    fn format_text(&self, level: &Level, target: &str, message: &str) -> String {
        format!(
            "[{} {} - {}] {}",
            humantime::format_rfc3339_seconds(SystemTime::now()),
            level,
            target,
            message
        )
    }

    fn format_json(&self, level: &Level, target: &str, message: &str) -> String {
        serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "severity": level.to_string(),
            "target": target,
            "message": message,
        })
        .to_string()
    }
}

impl<S, W> Layer<S> for LegacyFormatLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let output = match self.format {
            LogFormat::Text => self.format_text(metadata.level(), metadata.target(), &visitor.message),
            LogFormat::Json => self.format_json(metadata.level(), metadata.target(), &visitor.message),
        };

        let mut writer = self.writer.make_writer();
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.write_all(b"\n");
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
            if self.message.len() >= 2 && self.message.starts_with('"') && self.message.ends_with('"')
            {
                self.message = self.message[1..self.message.len() - 1].to_string();
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn make_writer(settings: &LoggerSettings) -> BoxMakeWriter {
    if settings.stdout {
        BoxMakeWriter::new(std::io::stdout)
    } else {
        BoxMakeWriter::new(tracing_appender::rolling::daily(
            user_directory(),
            LOG_FILE_PREFIX,
        ))
    }
}

fn format_layer(settings: &LoggerSettings, writer: BoxMakeWriter) -> BoxedLayer {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.to_tracing_level().to_string()));

    if !settings.use_tracing_format {
        return LegacyFormatLayer::new(writer, settings.format.clone())
            .with_filter(env_filter)
            .boxed();
    }

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_level(true);

    match settings.format {
        LogFormat::Json => layer.json().with_filter(env_filter).boxed(),
        LogFormat::Text => layer.compact().with_filter(env_filter).boxed(),
    }
}

pub fn setup_logging(settings: &LoggerSettings) -> Result<(), LoggerError> {
    clean_old_logs();

    let layer = format_layer(settings, make_writer(settings));
    tracing_subscriber::registry().with(layer).try_init()?;

    Ok(())
}
