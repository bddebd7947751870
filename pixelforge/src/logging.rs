//! Tracing subscriber setup.

use pixelforge_shared::errors::{PixelforgeError, PixelforgeResult};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::runtime::LoggingOptions;

const LOG_FILE_PREFIX: &str = "pixelforge.log";

/// Install the global subscriber.
///
/// Logs go to stderr, filtered by `RUST_LOG` or `options.filter`. With
/// `log_dir` set they are also written to a daily rolling file; keep the
/// returned guard alive until exit or buffered lines are lost.
pub fn init_logging(options: &LoggingOptions) -> PixelforgeResult<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&options.filter))
        .map_err(|e| {
            PixelforgeError::Config(format!("invalid log filter '{}': {}", options.filter, e))
        })?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(options.ansi)
        .with_target(false);

    let (file_layer, guard) = match &options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|e| {
                PixelforgeError::Config(format!(
                    "failed to create log dir {}: {}",
                    dir.display(),
                    e
                ))
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| PixelforgeError::Internal(format!("logging already initialized: {}", e)))?;

    Ok(guard)
}
