//! parlance - spoken study companion
//!
//! Listens on a microphone, detects when the user has finished speaking,
//! answers through pluggable recognizer / language model / synthesizer
//! adapters, grounds answers in an uploaded document and stops talking as
//! soon as the user interrupts.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod adapters;
pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(all(feature = "cli", feature = "cpal-audio"))]
pub mod diagnostics;
pub mod document;
pub mod engine;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;
pub mod session;

// Composition root - needs real devices and the CLI
#[cfg(all(feature = "cli", feature = "cpal-audio"))]
pub mod app;

// Core traits (capture → classify → endpoint → answer → play)
pub use adapters::{Adapters, GenerationAdapter, SynthesisAdapter, TranscriptionAdapter};
pub use audio::playback::AudioSink;
pub use audio::source::AudioSource;
pub use audio::vad::SpeechDetector;

// Engine
pub use engine::{Engine, EngineConfig, EngineHandle};
pub use orchestrator::{ConversationOrchestrator, OrchestratorConfig, TurnOutcome};
pub use session::{ConversationState, ConversationTurn, Session, SessionEvent, Transcript};

// Documents
pub use document::{DocumentIndex, DocumentLoader};

// Error handling
pub use error::{ParlanceError, Result};

// Config
pub use config::Config;

// Station framework (for advanced users)
pub use pipeline::error::{ErrorReporter, StationError};
pub use pipeline::station::Station;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
