//! Tracing setup for pool binaries.
//!
//! `RUST_LOG` wins when set. Otherwise `WORKPOOL_LOG` picks the level for the pool crates
//! (default `info`). `LOG_FORMAT=json` switches to JSON lines.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, writer::BoxMakeWriter};
use tracing_subscriber::prelude::*;

fn level_from(value: Option<&str>) -> &'static str {
    match value {
        Some("trace") => "trace",
        Some("debug") => "debug",
        Some("warn") | Some("warning") => "warn",
        Some("error") => "error",
        _ => "info",
    }
}

fn default_directives(level: &str) -> String {
    format!("workpool={level},workpool_demo={level}")
}

fn open_log(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Safe to call more than once; later calls are no-ops.
///
/// Master and workers share `log_file` through append mode. Falls back to stderr when the
/// file cannot be opened.
pub fn init_tracing(log_file: Option<&Path>) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = level_from(std::env::var("WORKPOOL_LOG").ok().as_deref());
        EnvFilter::new(default_directives(level))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    let mut open_error = None;
    let file = log_file.and_then(|path| match open_log(path) {
        Ok(file) => Some(file),
        Err(e) => {
            open_error = Some((path.to_path_buf(), e));
            None
        }
    });
    let to_file = file.is_some();
    let writer = match file {
        Some(file) => BoxMakeWriter::new(Mutex::new(file)),
        None => BoxMakeWriter::new(std::io::stderr),
    };

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(writer));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(!to_file).with_writer(writer));
        let _ = subscriber.try_init();
    }

    if let Some((path, error)) = open_error {
        tracing::warn!(path = %path.display(), %error, "Cannot open log file, logging to stderr");
    }
}
