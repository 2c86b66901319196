//! Error types for parlance.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParlanceError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Device errors (fatal to the session)
    #[error("Audio device unavailable: {device}: {message}")]
    DeviceUnavailable { device: String, message: String },

    #[error("Unsupported frame format: {sample_rate}Hz / {frame_ms}ms frames ({message})")]
    UnsupportedFrameFormat {
        sample_rate: u32,
        frame_ms: u32,
        message: String,
    },

    // Adapter errors (recoverable, the conversation returns to listening)
    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("Synthesis failed: {message}")]
    SynthesisFailed { message: String },

    #[error("{adapter} did not respond within {}ms", .timeout.as_millis())]
    AdapterTimeout {
        adapter: &'static str,
        timeout: Duration,
    },

    // Storage errors
    #[error("Scratch storage unavailable at {path}: {message}")]
    ScratchStorageUnavailable { path: String, message: String },

    // Document errors (recoverable, the session continues without grounding)
    #[error("Document contains no extractable text")]
    EmptyDocument,

    #[error("Unsupported document format: {path} (expected one of: {expected})")]
    UnsupportedDocumentFormat { path: String, expected: String },

    #[error("Document too large: {path} is {size} bytes (limit {limit})")]
    DocumentTooLarge { path: String, size: u64, limit: u64 },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl ParlanceError {
    /// Returns true if this error must end the session.
    ///
    /// Adapter and document errors are recoverable: the conversation keeps
    /// listening. Device, frame-format, scratch-storage and configuration
    /// errors are not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ParlanceError::DeviceUnavailable { .. }
            | ParlanceError::UnsupportedFrameFormat { .. }
            | ParlanceError::ScratchStorageUnavailable { .. }
            | ParlanceError::ConfigInvalidValue { .. }
            | ParlanceError::Config(_) => true,
            ParlanceError::TranscriptionFailed { .. }
            | ParlanceError::GenerationFailed { .. }
            | ParlanceError::SynthesisFailed { .. }
            | ParlanceError::AdapterTimeout { .. }
            | ParlanceError::EmptyDocument
            | ParlanceError::UnsupportedDocumentFormat { .. }
            | ParlanceError::DocumentTooLarge { .. } => false,
            ParlanceError::Io(_) | ParlanceError::Other(_) => true,
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, ParlanceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_device_unavailable_display() {
        let error = ParlanceError::DeviceUnavailable {
            device: "default".to_string(),
            message: "no input device found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Audio device unavailable: default: no input device found"
        );
    }

    #[test]
    fn test_unsupported_frame_format_display() {
        let error = ParlanceError::UnsupportedFrameFormat {
            sample_rate: 44100,
            frame_ms: 30,
            message: "rate not supported".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Unsupported frame format: 44100Hz / 30ms frames (rate not supported)"
        );
    }

    #[test]
    fn test_adapter_timeout_display() {
        let error = ParlanceError::AdapterTimeout {
            adapter: "generation",
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            error.to_string(),
            "generation did not respond within 1500ms"
        );
    }

    #[test]
    fn test_scratch_storage_display() {
        let error = ParlanceError::ScratchStorageUnavailable {
            path: "/tmp/parlance".to_string(),
            message: "read-only file system".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Scratch storage unavailable at /tmp/parlance: read-only file system"
        );
    }

    #[test]
    fn test_document_too_large_display() {
        let error = ParlanceError::DocumentTooLarge {
            path: "notes.md".to_string(),
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            error.to_string(),
            "Document too large: notes.md is 2048 bytes (limit 1024)"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(
            ParlanceError::DeviceUnavailable {
                device: "mic".to_string(),
                message: "gone".to_string(),
            }
            .is_fatal()
        );
        assert!(
            ParlanceError::UnsupportedFrameFormat {
                sample_rate: 16000,
                frame_ms: 25,
                message: "bad".to_string(),
            }
            .is_fatal()
        );
        assert!(
            ParlanceError::ScratchStorageUnavailable {
                path: "/x".to_string(),
                message: "denied".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(
            !ParlanceError::TranscriptionFailed {
                message: "x".to_string()
            }
            .is_fatal()
        );
        assert!(
            !ParlanceError::GenerationFailed {
                message: "x".to_string()
            }
            .is_fatal()
        );
        assert!(
            !ParlanceError::SynthesisFailed {
                message: "x".to_string()
            }
            .is_fatal()
        );
        assert!(
            !ParlanceError::AdapterTimeout {
                adapter: "transcription",
                timeout: Duration::from_secs(1),
            }
            .is_fatal()
        );
        assert!(!ParlanceError::EmptyDocument.is_fatal());
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ParlanceError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ParlanceError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ParlanceError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ParlanceError>();
        assert_sync::<ParlanceError>();
    }
}
