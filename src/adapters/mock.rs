//! In-memory adapters for tests and offline runs.

use super::{GenerationAdapter, PromptContext, SynthesisAdapter, Transcription, TranscriptionAdapter};
use crate::audio::playback::AudioClip;
use crate::defaults::SAMPLE_RATE;
use crate::error::{ParlanceError, Result};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Transcriber that returns scripted text.
///
/// Responses are used in order; the last one repeats.
#[derive(Debug)]
pub struct MockTranscription {
    responses: Mutex<Vec<String>>,
    confidence: Option<f32>,
    should_fail: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
    samples_seen: AtomicUsize,
}

impl MockTranscription {
    pub fn new(response: &str) -> Self {
        Self::with_sequence(&[response])
    }

    pub fn with_sequence(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().rev().map(|r| r.to_string()).collect()),
            confidence: None,
            should_fail: false,
            delay: None,
            calls: AtomicUsize::new(0),
            samples_seen: AtomicUsize::new(0),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Total samples received across all calls.
    pub fn samples_seen(&self) -> usize {
        self.samples_seen.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> String {
        let Ok(mut responses) = self.responses.lock() else {
            return String::new();
        };
        if responses.len() > 1 {
            responses.pop().unwrap_or_default()
        } else {
            responses.last().cloned().unwrap_or_default()
        }
    }
}

impl TranscriptionAdapter for MockTranscription {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.samples_seen.fetch_add(audio.len(), Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.should_fail {
            return Err(ParlanceError::TranscriptionFailed {
                message: "mock transcription failure".to_string(),
            });
        }
        Ok(Transcription {
            text: self.next_response(),
            confidence: self.confidence,
        })
    }

    fn name(&self) -> &str {
        "mock-transcription"
    }
}

/// Generator that returns a fixed reply and records every prompt.
#[derive(Debug)]
pub struct MockGeneration {
    response: String,
    should_fail: bool,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl MockGeneration {
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Rendered prompts, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

impl GenerationAdapter for MockGeneration {
    fn generate(&self, context: &PromptContext) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(context.render());
        }
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.should_fail {
            return Err(ParlanceError::GenerationFailed {
                message: "mock generation failure".to_string(),
            });
        }
        Ok(self.response.clone())
    }

    fn name(&self) -> &str {
        "mock-generation"
    }
}

/// Synthesizer that renders every text as a tone of fixed length.
#[derive(Debug)]
pub struct MockSynthesis {
    duration_ms: u64,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockSynthesis {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SynthesisAdapter for MockSynthesis {
    fn synthesize(&self, _text: &str) -> Result<AudioClip> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(ParlanceError::SynthesisFailed {
                message: "mock synthesis failure".to_string(),
            });
        }
        let len = (SAMPLE_RATE as u64 * self.duration_ms / 1000) as usize;
        let samples = (0..len)
            .map(|i| if (i / 20) % 2 == 0 { 8000 } else { -8000 })
            .collect();
        Ok(AudioClip::new(samples, SAMPLE_RATE))
    }

    fn name(&self) -> &str {
        "mock-synthesis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcription_sequence_repeats_last() {
        let mock = MockTranscription::with_sequence(&["", "hello"]);
        assert_eq!(mock.transcribe(&[0; 10]).unwrap().text, "");
        assert_eq!(mock.transcribe(&[0; 10]).unwrap().text, "hello");
        assert_eq!(mock.transcribe(&[0; 10]).unwrap().text, "hello");
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.samples_seen(), 30);
    }

    #[test]
    fn test_transcription_failure() {
        let mock = MockTranscription::new("x").with_failure();
        assert!(matches!(
            mock.transcribe(&[]),
            Err(ParlanceError::TranscriptionFailed { .. })
        ));
        assert_eq!(mock.call_count(), 1);
    }

    #[test]
    fn test_generation_records_prompts() {
        let mock = MockGeneration::new("Sure.");
        let reply = mock.generate(&PromptContext::new("hi")).unwrap();
        assert_eq!(reply, "Sure.");
        assert_eq!(mock.prompts(), vec!["User: hi\nAssistant:".to_string()]);
    }

    #[test]
    fn test_synthesis_clip_length() {
        let mock = MockSynthesis::new(500);
        let clip = mock.synthesize("hello").unwrap();
        assert_eq!(clip.duration_ms(), 500);
        assert!(!clip.is_empty());
        assert!(mock.with_failure().synthesize("x").is_err());
    }
}
