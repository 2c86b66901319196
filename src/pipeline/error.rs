//! Error types and reporting for pipeline stations.

use crate::error::ParlanceError;
use std::fmt;
use std::sync::Mutex;
use tracing::{error, warn};

/// Errors that can occur during station processing.
#[derive(Debug, Clone)]
pub enum StationError {
    /// Recoverable error that allows the station to continue processing.
    Recoverable(String),
    /// Fatal error that requires the station to shut down.
    Fatal(String),
}

impl StationError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StationError::Fatal(_))
    }
}

impl fmt::Display for StationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationError::Recoverable(msg) => write!(f, "Recoverable error: {}", msg),
            StationError::Fatal(msg) => write!(f, "Fatal error: {}", msg),
        }
    }
}

impl std::error::Error for StationError {}

impl From<ParlanceError> for StationError {
    fn from(err: ParlanceError) -> Self {
        if err.is_fatal() {
            StationError::Fatal(err.to_string())
        } else {
            StationError::Recoverable(err.to_string())
        }
    }
}

/// Trait for reporting station errors.
pub trait ErrorReporter: Send + Sync {
    /// Reports an error from a station.
    fn report(&self, station: &str, error: &StationError);
}

/// Reports station errors through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn report(&self, station: &str, error: &StationError) {
        match error {
            StationError::Recoverable(msg) => warn!(station, "{msg}"),
            StationError::Fatal(msg) => error!(station, "{msg}"),
        }
    }
}

/// Logs like [`LogReporter`] and keeps the first fatal error.
///
/// The engine polls it to end the session when a worker dies.
#[derive(Debug, Default)]
pub struct FatalLatch {
    first_fatal: Mutex<Option<String>>,
}

impl FatalLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first fatal error reported, as "station: message".
    pub fn fatal(&self) -> Option<String> {
        self.first_fatal.lock().ok().and_then(|f| f.clone())
    }
}

impl ErrorReporter for FatalLatch {
    fn report(&self, station: &str, error: &StationError) {
        LogReporter.report(station, error);
        if let StationError::Fatal(msg) = error
            && let Ok(mut first) = self.first_fatal.lock()
            && first.is_none()
        {
            *first = Some(format!("{station}: {msg}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_error_display() {
        let recoverable = StationError::Recoverable("temporary failure".to_string());
        assert_eq!(
            recoverable.to_string(),
            "Recoverable error: temporary failure"
        );

        let fatal = StationError::Fatal("critical failure".to_string());
        assert_eq!(fatal.to_string(), "Fatal error: critical failure");
    }

    #[test]
    fn test_from_parlance_error_keeps_severity() {
        let device: StationError = ParlanceError::DeviceUnavailable {
            device: "mic".to_string(),
            message: "unplugged".to_string(),
        }
        .into();
        assert!(device.is_fatal());

        let adapter: StationError = ParlanceError::TranscriptionFailed {
            message: "timeout".to_string(),
        }
        .into();
        assert!(!adapter.is_fatal());
    }

    #[test]
    fn test_log_reporter() {
        let reporter = LogReporter;
        reporter.report("TestStation", &StationError::Recoverable("test".to_string()));
    }

    #[test]
    fn test_fatal_latch_keeps_first_fatal() {
        let latch = FatalLatch::new();
        latch.report("a", &StationError::Recoverable("ignored".to_string()));
        assert!(latch.fatal().is_none());

        latch.report("b", &StationError::Fatal("first".to_string()));
        latch.report("c", &StationError::Fatal("second".to_string()));
        assert_eq!(latch.fatal().as_deref(), Some("b: first"));
    }
}
