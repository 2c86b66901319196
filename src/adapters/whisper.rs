//! In-process transcription with whisper.cpp.
//!
//! Requires the `whisper` feature (and cmake at build time). Without it,
//! [`WhisperTranscription::new`] reports that the build lacks the feature.

use super::{Transcription, TranscriptionAdapter};
use crate::error::{ParlanceError, Result};
use std::path::{Path, PathBuf};

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Whisper model settings.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    pub model_path: PathBuf,
    /// Language code, or `None` to auto-detect.
    pub language: Option<String>,
    pub threads: Option<usize>,
}

#[cfg_attr(not(feature = "whisper"), allow(dead_code))]
fn model_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("whisper")
        .to_string()
}

fn check_model(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(ParlanceError::TranscriptionFailed {
            message: format!("Whisper model not found: {}", path.display()),
        })
    }
}

/// Converts 16-bit PCM to the normalized floats Whisper expects.
pub fn to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / 32768.0).collect()
}

#[cfg(feature = "whisper")]
pub struct WhisperTranscription {
    context: Mutex<WhisperContext>,
    config: WhisperConfig,
    name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscription")
            .field("config", &self.config)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "whisper")]
impl WhisperTranscription {
    /// Loads the model.
    ///
    /// # Errors
    /// `TranscriptionFailed` if the model file is missing or cannot be loaded.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });
        check_model(&config.model_path)?;

        let path = config
            .model_path
            .to_str()
            .ok_or_else(|| ParlanceError::TranscriptionFailed {
                message: "Invalid UTF-8 in model path".to_string(),
            })?;
        let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| ParlanceError::TranscriptionFailed {
                message: format!("Failed to load Whisper model: {e}"),
            })?;

        Ok(Self {
            context: Mutex::new(context),
            name: model_name(&config.model_path),
            config,
        })
    }
}

#[cfg(feature = "whisper")]
impl TranscriptionAdapter for WhisperTranscription {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription> {
        let failed = |message: String| ParlanceError::TranscriptionFailed { message };

        let audio = to_f32(audio);
        let context = self
            .context
            .lock()
            .map_err(|e| failed(format!("Failed to acquire context lock: {e}")))?;
        let mut state = context
            .create_state()
            .map_err(|e| failed(format!("Failed to create Whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(self.config.language.as_deref());
        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio)
            .map_err(|e| failed(format!("Whisper inference failed: {e}")))?;

        let mut text = String::new();
        let mut confidence_sum = 0.0_f32;
        let mut segments = 0u32;
        for segment in state.as_iter() {
            text.push_str(&segment.to_string());
            confidence_sum += 1.0 - segment.no_speech_probability();
            segments += 1;
        }
        let confidence = if segments > 0 {
            (confidence_sum / segments as f32).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(Transcription::new(text.trim()).with_confidence(confidence))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscription {
    _unavailable: (),
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscription {
    /// Always fails: this build has no in-process recognizer.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        check_model(&config.model_path)?;
        Err(ParlanceError::TranscriptionFailed {
            message: "Whisper support not compiled in. Rebuild with --features whisper \
                      or set adapters.transcribe_command"
                .to_string(),
        })
    }
}

#[cfg(not(feature = "whisper"))]
impl TranscriptionAdapter for WhisperTranscription {
    fn transcribe(&self, _audio: &[i16]) -> Result<Transcription> {
        Err(ParlanceError::TranscriptionFailed {
            message: "Whisper support not compiled in".to_string(),
        })
    }

    fn name(&self) -> &str {
        "whisper"
    }
}
