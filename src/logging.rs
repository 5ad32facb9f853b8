//! Structured logging setup.

use std::fs;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::paths;

/// Default filter when `RUST_LOG` is unset. Third-party crates that chatter
/// at startup are capped at `warn`.
const DEFAULT_FILTER: &str =
    "info,reqwest=warn,hyper=warn,hyper_util=warn,mio=warn,cpal=warn,symphonia=warn,symphonia_core=warn";

/// Initialize the structured logging system.
///
/// Sets up:
/// - File output: rolling log files in `{data_dir}/logs/speech-queue.log`
///   with daily rotation, keeping the latest 5 files.
/// - Console output on stderr (stdout carries the JSON-line protocol).
/// - Environment filter: defaults to `info`, configurable via `RUST_LOG`.
///
/// If the log directory is unusable, logging continues on stderr only.
pub fn init() -> anyhow::Result<()> {
    let log_dir = paths::get_log_dir();
    let _ = fs::create_dir_all(&log_dir);

    let file_layer = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("speech-queue")
        .filename_suffix("log")
        .max_log_files(5)
        .build(&log_dir)
    {
        Ok(appender) => Some(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true),
        ),
        Err(e) => {
            eprintln!("File logging disabled ({}): {}", log_dir.display(), e);
            None
        }
    };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(log_dir = %log_dir.display(), "Logger initialized");
    Ok(())
}
