//! Tracing setup for the fleet binary

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{FleetError, Result};

const LOG_FILE: &str = "botfleet.log";

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Console output goes to stderr so
/// stdout stays free for control responses. When `config.dir` is set and
/// writable, a daily rolling file is added; keep the returned guard alive
/// until exit or buffered lines are lost.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| FleetError::InvalidConfig(format!("logging.level: {e}")))?;

    let (plain, json) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true);
        (None, Some(layer))
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false);
        (Some(layer), None)
    };

    let mut guard = None;
    let file_layer = match config.dir.as_deref() {
        Some(dir) if writable(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, worker) = tracing_appender::non_blocking(appender);
            guard = Some(worker);
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        Some(dir) => {
            eprintln!("Warning: log directory {} is not writable, file logging disabled", dir);
            None
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .try_init()
        .map_err(|e| FleetError::Internal(format!("logging already initialized: {e}")))?;
    Ok(guard)
}

// The rolling appender panics if it cannot create its first file
fn writable(dir: &str) -> bool {
    if std::fs::create_dir_all(dir).is_err() {
        return false;
    }
    let probe = Path::new(dir).join(".botfleet_write_test");
    let ok = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&probe)
        .is_ok();
    let _ = std::fs::remove_file(&probe);
    ok
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writable_rejects_file_path() {
        let dir = std::env::temp_dir().join(format!("botfleet-log-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        assert!(writable(dir.to_str().unwrap()));

        let file = dir.join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        assert!(!writable(file.to_str().unwrap()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
