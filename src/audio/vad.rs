//! Voice activity classification.
//!
//! Tags each frame as speech or silence. The classifier holds no state
//! between calls; timing decisions (debounce, hangover, barge-in) belong to
//! the endpointer and the interrupt monitor, which share its output.

use crate::defaults;
use crate::error::{ParlanceError, Result};
use crate::pipeline::types::AudioFrame;
use serde::Serialize;

/// Per-frame classification result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceActivity {
    Speech,
    Silence,
}

/// Sample rate and frame duration of the captured stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub frame_ms: u32,
}

impl FrameFormat {
    pub fn new(sample_rate: u32, frame_ms: u32) -> Self {
        Self {
            sample_rate,
            frame_ms,
        }
    }

    /// Number of samples in one frame.
    pub fn samples_per_frame(&self) -> usize {
        defaults::samples_per_frame(self.sample_rate, self.frame_ms)
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self::new(defaults::SAMPLE_RATE, defaults::FRAME_MS)
    }
}

/// A short-horizon speech detector.
///
/// Implementations look at one frame at a time.
pub trait SpeechDetector: Send + Sync {
    /// Returns true if the frame contains speech.
    fn is_speech(&self, samples: &[i16]) -> bool;

    /// Returns true if the detector can handle frames of this format.
    fn supports(&self, format: FrameFormat) -> bool {
        defaults::SUPPORTED_SAMPLE_RATES.contains(&format.sample_rate)
            && defaults::SUPPORTED_FRAME_MS.contains(&format.frame_ms)
    }
}

/// RMS energy detector.
#[derive(Debug, Clone, Copy)]
pub struct EnergyDetector {
    threshold: f32,
}

impl EnergyDetector {
    /// Creates a detector with an RMS threshold in 0.0..=1.0.
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for EnergyDetector {
    fn default() -> Self {
        Self::new(defaults::VAD_THRESHOLD)
    }
}

impl SpeechDetector for EnergyDetector {
    fn is_speech(&self, samples: &[i16]) -> bool {
        calculate_rms(samples) > self.threshold
    }
}

/// Classifies frames with a detector whose format was validated up front.
///
/// Validation happens once in [`VoiceActivityClassifier::new`]; `classify`
/// never fails, so a misconfigured format cannot turn into a per-frame error
/// loop.
pub struct VoiceActivityClassifier<D: SpeechDetector = EnergyDetector> {
    detector: D,
    format: FrameFormat,
}

impl<D: SpeechDetector> VoiceActivityClassifier<D> {
    /// Creates a classifier, rejecting formats the detector cannot handle.
    ///
    /// # Errors
    /// Returns `ParlanceError::UnsupportedFrameFormat` if the detector does
    /// not support `format`.
    pub fn new(detector: D, format: FrameFormat) -> Result<Self> {
        if !detector.supports(format) {
            return Err(ParlanceError::UnsupportedFrameFormat {
                sample_rate: format.sample_rate,
                frame_ms: format.frame_ms,
                message: format!(
                    "supported rates: {:?}, supported frame durations: {:?}ms",
                    defaults::SUPPORTED_SAMPLE_RATES,
                    defaults::SUPPORTED_FRAME_MS
                ),
            });
        }
        Ok(Self { detector, format })
    }

    /// Classifies a frame as speech or silence.
    pub fn classify(&self, frame: &AudioFrame) -> VoiceActivity {
        if frame.samples.is_empty() || !self.detector.is_speech(&frame.samples) {
            VoiceActivity::Silence
        } else {
            VoiceActivity::Speech
        }
    }

    /// The validated frame format.
    pub fn format(&self) -> FrameFormat {
        self.format
    }
}

/// Calculates the Root Mean Square (RMS) of audio samples.
///
/// # Returns
/// Normalized RMS value (0.0 to 1.0), where:
/// - 0.0 represents silence
/// - ~0.707 represents a full-scale sine wave
/// - 1.0 represents maximum amplitude
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}
