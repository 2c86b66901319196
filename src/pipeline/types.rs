//! Data types flowing between the capture, listener and conversation workers.

use crate::audio::vad::VoiceActivity;
use std::time::Instant;

/// A fixed-size frame of 16-bit PCM samples.
///
/// Produced by the capture worker with `activity: None`; the classifier
/// station returns it tagged. Frames are never modified after tagging.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Monotonically increasing capture sequence number.
    pub sequence: u64,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Timestamp when this frame was captured.
    pub captured_at: Instant,
    /// Speech/silence tag, set once by the classifier.
    pub activity: Option<VoiceActivity>,
}

impl AudioFrame {
    /// Creates a new unclassified frame.
    pub fn new(samples: Vec<i16>, sequence: u64, sample_rate: u32) -> Self {
        Self {
            samples,
            sequence,
            sample_rate,
            captured_at: Instant::now(),
            activity: None,
        }
    }

    /// Returns this frame tagged with a classification result.
    pub fn classified(mut self, activity: VoiceActivity) -> Self {
        self.activity = Some(activity);
        self
    }

    /// True if the classifier tagged this frame as speech.
    pub fn is_speech(&self) -> bool {
        self.activity == Some(VoiceActivity::Speech)
    }

    /// Frame duration in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        if self.sample_rate == 0 {
            return 0;
        }
        ((self.samples.len() as u64 * 1000) / self.sample_rate as u64) as u32
    }
}

/// Ordered frames between a confirmed start-of-speech and end-of-speech.
///
/// Sequence numbers are strictly increasing and contiguous.
#[derive(Debug, Clone)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
}

impl Utterance {
    /// Builds an utterance from contiguous frames.
    ///
    /// Returns `None` when `frames` is empty or has a sequence gap.
    pub fn from_frames(frames: Vec<AudioFrame>) -> Option<Self> {
        if frames.is_empty() {
            return None;
        }
        let contiguous = frames
            .windows(2)
            .all(|pair| pair[1].sequence == pair[0].sequence + 1);
        if !contiguous {
            return None;
        }
        Some(Self { frames })
    }

    /// The frames of this utterance, in capture order.
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false; an utterance holds at least one frame.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Sequence number of the first frame.
    pub fn first_sequence(&self) -> u64 {
        self.frames.first().map(|f| f.sequence).unwrap_or(0)
    }

    /// Sequence number of the last frame.
    pub fn last_sequence(&self) -> u64 {
        self.frames.last().map(|f| f.sequence).unwrap_or(0)
    }

    /// Sample rate shared by every frame.
    pub fn sample_rate(&self) -> u32 {
        self.frames.first().map(|f| f.sample_rate).unwrap_or(0)
    }

    /// Total duration in milliseconds.
    pub fn duration_ms(&self) -> u32 {
        self.frames.iter().map(AudioFrame::duration_ms).sum()
    }

    /// Concatenated PCM samples, consuming the utterance.
    pub fn into_samples(self) -> Vec<i16> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut samples = Vec::with_capacity(total);
        for frame in self.frames {
            samples.extend_from_slice(&frame.samples);
        }
        samples
    }
}

/// Events produced by the listener worker for the conversation worker.
#[derive(Debug)]
pub enum ListenerEvent {
    /// A complete utterance; the conversation is now transcribing it.
    Utterance(Utterance),
    /// The user spoke over playback; playback was cancelled.
    BargeIn {
        /// Sequence number of the first captured interrupting frame.
        first_sequence: u64,
        /// Number of interrupting frames carried into the next utterance.
        carried_frames: usize,
    },
}
