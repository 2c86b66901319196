//! Default configuration constants for parlance.
//!
//! Shared by the config layer, the pipeline builders and the tests so every
//! threshold has exactly one definition.

use std::time::Duration;

/// Audio sample rate in Hz for the whole pipeline.
///
/// The classifier only accepts a small set of rates; capture, endpointing,
/// transcription and playback all run at this one.
pub const SAMPLE_RATE: u32 = 16000;

/// Duration of one captured frame in milliseconds.
pub const FRAME_MS: u32 = 30;

/// Frame durations the voice activity classifier accepts.
pub const SUPPORTED_FRAME_MS: &[u32] = &[10, 20, 30];

/// Sample rates the voice activity classifier accepts.
pub const SUPPORTED_SAMPLE_RATES: &[u32] = &[8000, 16000, 32000, 48000];

/// Capacity of the capture queue, in frames (~7.7s at 30ms frames).
///
/// When full, the oldest frame is overwritten so capture never blocks.
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// RMS threshold (0.0 to 1.0) above which a frame counts as speech.
pub const VAD_THRESHOLD: f32 = 0.02;

/// Consecutive speech frames required to confirm start-of-speech (300ms).
pub const DEBOUNCE_FRAMES: usize = 10;

/// Consecutive silence frames required to confirm end-of-speech (750ms).
///
/// Longer than a typical breath pause so sentences are not split.
pub const HANGOVER_FRAMES: usize = 25;

/// Sustained speech during playback that counts as barge-in.
///
/// Shorter than the endpointer debounce so interrupting feels responsive.
pub const BARGE_IN_MS: u32 = 240;

/// Longest utterance the endpointer buffers before forcing a boundary.
pub const MAX_UTTERANCE_MS: u32 = 30_000;

/// Upper bound on any single transcription/generation/synthesis call.
pub const ADAPTER_TIMEOUT: Duration = Duration::from_secs(30);

/// Transcripts with a confidence below this are discarded (0.0 keeps all).
pub const MIN_CONFIDENCE: f32 = 0.0;

/// How many previous turns are included in the generation prompt.
pub const HISTORY_TURNS: usize = 6;

/// Largest document accepted by the ingestion surface, in bytes.
pub const MAX_DOCUMENT_BYTES: u64 = 1024 * 1024;

/// Maximum characters per document chunk.
pub const MAX_CHUNK_CHARS: usize = 800;

/// Number of chunks retrieved per user turn.
pub const RETRIEVAL_TOP_K: usize = 3;

/// File extensions accepted by the document ingestion surface.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Frames queued ahead of the output device during playback.
pub const PLAYBACK_QUEUE_FRAMES: usize = 4;

/// Directory name used under the system temp dir for scratch audio.
pub const SCRATCH_DIR_NAME: &str = "parlance";

/// Response used when generation returns nothing usable.
pub const FALLBACK_RESPONSE: &str = "I'm sorry, I couldn't process that properly.";

/// Spoken when a session starts.
pub const GREETING: &str = "Hello! I'm your study buddy. How can I help you today?";

/// Transcripts consisting only of these markers are treated as silence.
///
/// Speech recognizers emit them for breath noise, music or empty audio.
pub const NON_SPEECH_MARKERS: &[&str] = &[
    "[blank_audio]",
    "[silence]",
    "(silence)",
    "[music]",
    "(music)",
    "[noise]",
    "(noise)",
    "[inaudible]",
    "(inaudible)",
];

/// Number of samples in one frame at the given rate and duration.
pub const fn samples_per_frame(sample_rate: u32, frame_ms: u32) -> usize {
    (sample_rate as usize * frame_ms as usize) / 1000
}

/// Number of whole frames covering `duration_ms`, rounded up, at least 1.
pub fn frames_for_ms(duration_ms: u32, frame_ms: u32) -> usize {
    if frame_ms == 0 {
        return 1;
    }
    (duration_ms.div_ceil(frame_ms) as usize).max(1)
}
