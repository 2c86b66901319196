//! Boundary calls to the speech-to-text, language model and text-to-speech
//! providers.
//!
//! The orchestrator only sees these three traits. Implementations live in
//! submodules: mocks for tests, external commands for real providers, and
//! optionally in-process Whisper.

pub mod command;
pub mod mock;
pub mod prompt;
pub mod timeout;
pub mod whisper;

use crate::audio::playback::{AudioClip, CancelToken};
use crate::error::Result;
use std::sync::Arc;

pub use command::{CommandGeneration, CommandSpec, CommandSynthesis, CommandTranscription};
pub use mock::{MockGeneration, MockSynthesis, MockTranscription};
pub use prompt::{ContextChunk, PromptContext, clean_response, is_non_speech};
pub use timeout::call_with_timeout;

/// Text recognized from one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub text: String,
    /// 0.0 to 1.0, if the recognizer reports one.
    pub confidence: Option<f32>,
}

impl Transcription {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Speech-to-text for a complete utterance (16kHz mono PCM).
///
/// The `_cancellable` variants are what the orchestrator calls. Providers
/// that hold an external resource, such as a child process, override them
/// to release it once `cancel` fires.
pub trait TranscriptionAdapter: Send + Sync {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription>;

    fn transcribe_cancellable(&self, audio: &[i16], _cancel: &CancelToken) -> Result<Transcription> {
        self.transcribe(audio)
    }

    fn name(&self) -> &str;
}

/// Produces the assistant's reply for a prompt context.
pub trait GenerationAdapter: Send + Sync {
    fn generate(&self, context: &PromptContext) -> Result<String>;

    fn generate_cancellable(&self, context: &PromptContext, _cancel: &CancelToken) -> Result<String> {
        self.generate(context)
    }

    fn name(&self) -> &str;
}

/// Turns reply text into playable audio at the pipeline sample rate.
pub trait SynthesisAdapter: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<AudioClip>;

    fn synthesize_cancellable(&self, text: &str, _cancel: &CancelToken) -> Result<AudioClip> {
        self.synthesize(text)
    }

    fn name(&self) -> &str;
}

impl<T: TranscriptionAdapter + ?Sized> TranscriptionAdapter for Arc<T> {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription> {
        (**self).transcribe(audio)
    }

    fn transcribe_cancellable(&self, audio: &[i16], cancel: &CancelToken) -> Result<Transcription> {
        (**self).transcribe_cancellable(audio, cancel)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: GenerationAdapter + ?Sized> GenerationAdapter for Arc<T> {
    fn generate(&self, context: &PromptContext) -> Result<String> {
        (**self).generate(context)
    }

    fn generate_cancellable(&self, context: &PromptContext, cancel: &CancelToken) -> Result<String> {
        (**self).generate_cancellable(context, cancel)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: SynthesisAdapter + ?Sized> SynthesisAdapter for Arc<T> {
    fn synthesize(&self, text: &str) -> Result<AudioClip> {
        (**self).synthesize(text)
    }

    fn synthesize_cancellable(&self, text: &str, cancel: &CancelToken) -> Result<AudioClip> {
        (**self).synthesize_cancellable(text, cancel)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// The three providers a session talks to.
///
/// `synthesis` is `None` when speech output is disabled.
#[derive(Clone)]
pub struct Adapters {
    pub transcription: Arc<dyn TranscriptionAdapter>,
    pub generation: Arc<dyn GenerationAdapter>,
    pub synthesis: Option<Arc<dyn SynthesisAdapter>>,
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("transcription", &self.transcription.name())
            .field("generation", &self.generation.name())
            .field("synthesis", &self.synthesis.as_ref().map(|s| s.name()))
            .finish()
    }
}
