//! Utterance boundary detection from classified frames.
//!
//! Two thresholds decide the boundaries: `debounce_frames` consecutive
//! speech frames confirm a start, `hangover_frames` consecutive silence
//! frames confirm an end. The emitted utterance covers the whole speech
//! segment plus the hangover tail.

use crate::defaults;
use crate::pipeline::types::{AudioFrame, Utterance};
use tracing::{debug, trace};

/// Endpointer thresholds, in frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointerConfig {
    /// Consecutive speech frames required to confirm start-of-speech.
    pub debounce_frames: usize,
    /// Consecutive silence frames required to confirm end-of-speech.
    pub hangover_frames: usize,
    /// Force a boundary once an utterance reaches this many frames.
    pub max_utterance_frames: Option<usize>,
}

impl Default for EndpointerConfig {
    fn default() -> Self {
        Self {
            debounce_frames: defaults::DEBOUNCE_FRAMES,
            hangover_frames: defaults::HANGOVER_FRAMES,
            max_utterance_frames: Some(defaults::frames_for_ms(
                defaults::MAX_UTTERANCE_MS,
                defaults::FRAME_MS,
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Idle,
    SpeechCandidate,
    InSpeech,
    TrailingSilence,
}

/// Endpointing state machine. Owns the frames of the utterance being built.
#[derive(Debug)]
pub struct Endpointer {
    config: EndpointerConfig,
    state: EndpointState,
    buffer: Vec<AudioFrame>,
    speech_run: usize,
    silence_run: usize,
}

impl Endpointer {
    /// Thresholds are clamped so that an utterance is never capped before
    /// its start is confirmed: `max_utterance_frames` is at least
    /// `debounce_frames + 1`.
    pub fn new(config: EndpointerConfig) -> Self {
        let debounce_frames = config.debounce_frames.max(1);
        Self {
            config: EndpointerConfig {
                debounce_frames,
                hangover_frames: config.hangover_frames.max(1),
                max_utterance_frames: config
                    .max_utterance_frames
                    .map(|max| max.max(debounce_frames + 1)),
            },
            state: EndpointState::Idle,
            buffer: Vec::new(),
            speech_run: 0,
            silence_run: 0,
        }
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn config(&self) -> &EndpointerConfig {
        &self.config
    }

    /// Frames buffered for the utterance in progress.
    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    /// Discards any buffered audio and returns to `Idle`.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.speech_run = 0;
        self.silence_run = 0;
        self.transition(EndpointState::Idle);
    }

    /// Starts an utterance from frames that are already known to be speech.
    ///
    /// Used after barge-in so the interrupting frames open the next
    /// utterance. Non-contiguous input is ignored.
    pub fn resume_with(&mut self, frames: Vec<AudioFrame>) {
        self.reset();
        if frames.is_empty() {
            return;
        }
        let contiguous = frames
            .windows(2)
            .all(|pair| pair[1].sequence == pair[0].sequence + 1);
        if !contiguous {
            debug!("ignoring non-contiguous barge-in frames");
            return;
        }
        self.speech_run = frames.len();
        self.buffer = frames;
        self.transition(EndpointState::InSpeech);
    }

    /// Feeds one classified frame. Returns an utterance when one completes.
    pub fn push(&mut self, frame: AudioFrame) -> Option<Utterance> {
        if let Some(last) = self.buffer.last()
            && frame.sequence != last.sequence + 1
        {
            let flushed = self.flush_on_gap(last.sequence, frame.sequence);
            // From Idle one frame completes nothing: hangover needs a
            // confirmed start and the length cap exceeds the debounce run.
            let _ = self.step(frame);
            return flushed;
        }
        self.step(frame)
    }

    fn step(&mut self, frame: AudioFrame) -> Option<Utterance> {
        let speech = frame.is_speech();
        match (self.state, speech) {
            (EndpointState::Idle, false) => None,
            (EndpointState::Idle, true) => {
                self.buffer.push(frame);
                self.speech_run = 1;
                if self.speech_run >= self.config.debounce_frames {
                    self.transition(EndpointState::InSpeech);
                } else {
                    self.transition(EndpointState::SpeechCandidate);
                }
                self.check_max_length()
            }
            (EndpointState::SpeechCandidate, true) => {
                self.buffer.push(frame);
                self.speech_run += 1;
                if self.speech_run >= self.config.debounce_frames {
                    self.transition(EndpointState::InSpeech);
                }
                self.check_max_length()
            }
            (EndpointState::SpeechCandidate, false) => {
                trace!(frames = self.buffer.len(), "rejected speech candidate");
                self.reset();
                None
            }
            (EndpointState::InSpeech, true) => {
                self.buffer.push(frame);
                self.check_max_length()
            }
            (EndpointState::InSpeech, false) => {
                self.buffer.push(frame);
                self.silence_run = 1;
                self.transition(EndpointState::TrailingSilence);
                if self.silence_run >= self.config.hangover_frames {
                    return self.emit();
                }
                self.check_max_length()
            }
            (EndpointState::TrailingSilence, false) => {
                self.buffer.push(frame);
                self.silence_run += 1;
                if self.silence_run >= self.config.hangover_frames {
                    return self.emit();
                }
                self.check_max_length()
            }
            (EndpointState::TrailingSilence, true) => {
                self.buffer.push(frame);
                self.silence_run = 0;
                self.transition(EndpointState::InSpeech);
                self.check_max_length()
            }
        }
    }

    /// A capture gap ends the utterance in progress. Confirmed speech is
    /// emitted; an unconfirmed candidate is dropped.
    fn flush_on_gap(&mut self, last: u64, next: u64) -> Option<Utterance> {
        debug!(last, next, state = ?self.state, "frame sequence gap");
        match self.state {
            EndpointState::InSpeech | EndpointState::TrailingSilence => self.emit(),
            EndpointState::Idle | EndpointState::SpeechCandidate => {
                self.reset();
                None
            }
        }
    }

    fn check_max_length(&mut self) -> Option<Utterance> {
        let confirmed = matches!(
            self.state,
            EndpointState::InSpeech | EndpointState::TrailingSilence
        );
        match self.config.max_utterance_frames {
            Some(max) if confirmed && self.buffer.len() >= max => {
                debug!(frames = self.buffer.len(), "utterance reached maximum length");
                self.emit()
            }
            _ => None,
        }
    }

    fn emit(&mut self) -> Option<Utterance> {
        let frames = std::mem::take(&mut self.buffer);
        self.reset();
        let utterance = Utterance::from_frames(frames)?;
        debug!(
            first = utterance.first_sequence(),
            last = utterance.last_sequence(),
            duration_ms = utterance.duration_ms(),
            "utterance complete"
        );
        Some(utterance)
    }

    fn transition(&mut self, next: EndpointState) {
        if self.state != next {
            trace!(from = ?self.state, to = ?next, "endpointer");
            self.state = next;
        }
    }
}
