//! Structured Logger
//!
//! Wraps `tracing` to provide console output, an optional daily-rolling
//! NDJSON file, and environment-based level control.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const LOG_FILE_PREFIX: &str = "codepair.log";

/// Initialize the global logger. `RUST_LOG` wins over `level`.
///
/// Console output goes to stderr so stdout stays free for the pairing code
/// and received payloads. With `log_dir` set, JSON lines also go to
/// `{log_dir}/codepair.log.YYYY-MM-DD`.
pub fn init_logger<P: AsRef<Path>>(log_dir: Option<P>, level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true);

    let file_layer = log_dir.map(|dir| {
        let file_appender = RollingFileAppender::new(Rotation::DAILY, dir.as_ref(), LOG_FILE_PREFIX);
        fmt::layer().json().with_writer(file_appender).with_ansi(false)
    });

    // Ignore a second init; tests and embedders may already have one.
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
