//! Audio input, output and voice activity classification.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod frame_source;
pub mod playback;
pub mod source;
pub mod vad;
pub mod wav;

pub use frame_source::{AudioFrameSource, FrameSourceConfig};
pub use playback::{
    AudioClip, AudioSink, CancelToken, MemorySink, PlaybackController, PlaybackHandle,
    PlaybackOutcome,
};
pub use source::{AudioSource, ChannelAudioSource, MockAudioSource, ScriptedAudioSource};
pub use vad::{EnergyDetector, FrameFormat, SpeechDetector, VoiceActivity, VoiceActivityClassifier};
