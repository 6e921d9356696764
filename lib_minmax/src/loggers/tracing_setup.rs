//! # Tracing Setup
//!
//! Installs the process-wide `tracing` subscriber:
//! - a compact console layer stamped with local wall-clock time;
//! - a daily rolling JSON file layer when a log directory is configured.
//!
//! `RUST_LOG` overrides the level derived from the debug switch.

use std::fs;
use std::io;
use std::path::Path;

use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Level used when `RUST_LOG` is unset.
pub fn default_level(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Initializes logging for `app_name`.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process. It is `None` when no log directory is given.
pub fn setup_logging(
    debug: bool,
    log_dir: Option<&Path>,
    app_name: &str,
) -> io::Result<Option<WorkerGuard>> {
    let level = default_level(debug);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let console_layer = fmt::layer()
        .with_target(debug)
        .with_timer(ChronoLocal::new("%H:%M:%S".to_string()));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let (writer, guard) = non_blocking(rolling::daily(dir, app_name));
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .json()
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    info!("logging initialized with level: {}", level);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_switch_selects_level() {
        assert_eq!(default_level(true), "debug");
        assert_eq!(default_level(false), "info");
    }
}
