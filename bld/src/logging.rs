//! Tracing setup for the runner.
//!
//! Two sinks share one registry:
//!
//! - **stderr**: compact, filtered by `RUST_LOG` (default `info`). This is the
//!   operator's live view of a run.
//! - **log file**: every event at `debug` and above for this crate, without
//!   ANSI colors, appended to the path given by `--log`. This is the record
//!   that carries full diagnostics for each attempt.
//!
//! ```bash
//! RUST_LOG=bld=debug bld run --log /tmp/bld.log
//! ```

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_LOG_FILE: &str = "bld.log";

const FILE_FILTER: &str = "bld=debug,info";

/// Install the global subscriber. Call once, before any other work.
///
/// When `log_path` cannot be opened, a warning is printed and only the stderr
/// layer is installed.
pub fn init(log_path: Option<&Path>) {
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .compact()
        .with_filter(stderr_filter);

    let file_layer = match log_path.map(open_log_file).transpose() {
        Ok(file) => file.map(|file| {
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_filter(EnvFilter::new(FILE_FILTER))
        }),
        Err(err) => {
            eprintln!("warning: {err:#}; logging to stderr only");
            None
        }
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
}

fn open_log_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}
