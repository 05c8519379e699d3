//! Logging setup.
//!
//! Human-readable logs go to stderr. While the daemon runs they are also
//! written to a daily rolling file under the configured log directory.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::DaemonResult;

/// Prefix of rolling log file names.
pub const LOG_FILE_PREFIX: &str = "dropstash";

/// Filter for the requested verbosity: `debug` forces debug level, otherwise
/// `RUST_LOG` is honoured with `info` as the fallback.
pub fn env_filter(debug: bool) -> EnvFilter {
    if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// With `log_dir` set, a non-blocking daily file layer keeping `retention`
/// files is added; the returned guard must be held until exit so buffered
/// lines are flushed.
pub fn init_logging(
    debug: bool,
    log_dir: Option<(&Path, u32)>,
) -> DaemonResult<Option<WorkerGuard>> {
    let (file_layer, guard) = match log_dir {
        Some((dir, retention)) => {
            let appender = Builder::new()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .filename_suffix("log")
                .max_log_files(retention.max(1) as usize)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(env_filter(debug))
        .init();

    Ok(guard)
}
