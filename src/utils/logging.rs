//! Logging initialization for Clawgate.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: compact single-line output with sensitive fields redacted
//!   by [`redacting_fields`]
//! - `json`: structured JSON lines, optionally appended to a file
//!
//! The pretty and JSON formatters render event fields themselves, so call
//! sites pass user text and errors through [`log_field`] as well.

use std::fmt;

use tracing::field::Field;
use tracing_subscriber::field::MakeExt;
use tracing_subscriber::fmt::format::{self, Writer};
use tracing_subscriber::fmt::FormatFields;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::utils::string::log_field;

fn filter_for(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `cfg.level`. Calling this twice is
/// harmless: the second call leaves the first subscriber in place.
pub fn init_logging(cfg: &LoggingConfig) {
    let filter = filter_for(cfg);

    let result = match cfg.format {
        LogFormat::Json => match open_log_file(cfg.file.as_deref()) {
            Some(file) => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .try_init(),
            None => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init(),
        },
        LogFormat::Pretty => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Component => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .fmt_fields(redacting_fields())
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("logging already initialized: {}", e);
    }
}

fn open_log_file(path: Option<&str>) -> Option<std::fs::File> {
    let path = path?;
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
    {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("cannot open log file {}: {}, logging to stderr", path, e);
            None
        }
    }
}

fn write_redacted(writer: &mut Writer<'_>, field: &Field, value: &dyn fmt::Debug) -> fmt::Result {
    if field.name() == "message" {
        return write!(writer, "{:?}", value);
    }
    let rendered = format!("{:?}", value);
    write!(writer, "{}={}", field.name(), log_field(field.name(), &rendered))
}

/// Field formatter that passes every field through [`log_field`].
pub fn redacting_fields() -> impl for<'w> FormatFields<'w> + Send + Sync + 'static {
    format::debug_fn(write_redacted).delimited(" ")
}
