//! Diagnostic tracing for the runner.
//!
//! Tracing is for debugging the runner itself: `RUST_LOG` controls it and it
//! goes to stderr (plus a daily-rotated file under `.nightshift/logs/` once the
//! workspace exists). The Markdown run report in `runlog` is the product
//! artifact and is written regardless of these settings.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "nightshift.log";

#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Raise the default level from `warn` to `info`
    pub verbose: bool,
    /// Emit JSON lines on stderr instead of the compact format
    pub json: bool,
}

fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("nightshift=info,warn")
        } else {
            EnvFilter::new("warn")
        }
    })
}

/// Install the global subscriber.
///
/// When `log_dir` is given, diagnostics are also appended to a daily file in
/// it. The returned guard must be held until exit so buffered lines are
/// flushed.
pub fn init(options: LogOptions, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let stderr_layer = if options.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(default_filter(options.verbose))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_filter(default_filter(options.verbose))
            .boxed()
    };

    let (file_layer, guard) = match log_dir.filter(|d| d.is_dir()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("nightshift=debug,warn"))
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // A second init (e.g. from tests) leaves the first subscriber in place.
    let _ = tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init();

    guard
}
