//! Process-wide `tracing` subscriber.
//!
//! Verbosity picks the default level; `PARLANCE_LOG` overrides it with a
//! full filter directive (for example `parlance::pipeline=trace`).

use crate::error::Result;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::UtcTime;

/// Environment variable holding a filter directive.
pub const LOG_ENV: &str = "PARLANCE_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Default level for a `-v` count.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(level_for(verbosity)))
}

/// Installs the global subscriber. Later calls are no-ops.
///
/// Without `log_file`, human-readable lines go to stderr. With it, JSON
/// lines with UTC RFC 3339 timestamps are appended to the file.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Ok(());
    }

    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let subscriber = tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter(verbosity))
                .with_timer(UtcTime::rfc_3339())
                .with_writer(Mutex::new(file))
                .with_current_span(false)
                .with_span_list(false)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        None => {
            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(filter(verbosity))
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 2)
                .finish();
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }

    let _ = LOGGING_INIT.set(());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(0), "warn");
        assert_eq!(level_for(1), "info");
        assert_eq!(level_for(2), "debug");
        assert_eq!(level_for(3), "trace");
        assert_eq!(level_for(9), "trace");
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parlance.jsonl");
        init_logging(1, Some(&path)).unwrap();
        init_logging(3, None).unwrap();
        assert!(LOGGING_INIT.get().is_some());
    }
}
