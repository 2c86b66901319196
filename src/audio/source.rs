use crate::error::{ParlanceError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::collections::VecDeque;
use std::time::Duration;

/// Trait for audio input devices.
///
/// This trait allows swapping implementations (real microphone vs fake).
pub trait AudioSource: Send {
    /// Start capturing audio from the source.
    ///
    /// Opens the device; fails with `DeviceUnavailable` if it cannot.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing audio and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Read the samples captured since the last call.
    ///
    /// Returns an empty vector when nothing new is available.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// True for sources that end (files, scripts). Live sources return false.
    fn is_finite(&self) -> bool {
        false
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    is_started: bool,
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_read: bool,
}

impl MockAudioSource {
    /// Create a new mock audio source returning 10ms of silence per read
    pub fn new() -> Self {
        Self {
            is_started: false,
            samples: vec![0i16; 160],
            should_fail_start: false,
            should_fail_read: false,
        }
    }

    /// Configure the mock to return specific samples
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start, like a missing microphone
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    /// Configure the mock to fail on read
    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Check if the audio source is started
    pub fn is_started(&self) -> bool {
        self.is_started
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        if self.should_fail_start {
            Err(ParlanceError::DeviceUnavailable {
                device: "mock".to_string(),
                message: "no input device found".to_string(),
            })
        } else {
            self.is_started = true;
            Ok(())
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.is_started = false;
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.should_fail_read {
            Err(ParlanceError::Other("mock read failure".to_string()))
        } else {
            Ok(self.samples.clone())
        }
    }
}

/// Finite source that replays a fixed list of sample blocks, then ends.
#[derive(Debug, Clone, Default)]
pub struct ScriptedAudioSource {
    blocks: VecDeque<Vec<i16>>,
}

impl ScriptedAudioSource {
    pub fn new(blocks: Vec<Vec<i16>>) -> Self {
        Self {
            blocks: blocks.into(),
        }
    }
}

impl AudioSource for ScriptedAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        Ok(self.blocks.pop_front().unwrap_or_default())
    }

    fn is_finite(&self) -> bool {
        true
    }
}

/// Live source fed from a channel, for driving the engine in real time.
///
/// Reads wait up to `poll` for the next block. Once every sender is dropped
/// the source reports itself as finished.
#[derive(Debug)]
pub struct ChannelAudioSource {
    rx: Receiver<Vec<i16>>,
    poll: Duration,
    disconnected: bool,
}

impl ChannelAudioSource {
    pub fn new(rx: Receiver<Vec<i16>>) -> Self {
        Self {
            rx,
            poll: Duration::from_millis(5),
            disconnected: false,
        }
    }
}

impl AudioSource for ChannelAudioSource {
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        match self.rx.recv_timeout(self.poll) {
            Ok(samples) => Ok(samples),
            Err(RecvTimeoutError::Timeout) => Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => {
                self.disconnected = true;
                Ok(Vec::new())
            }
        }
    }

    fn is_finite(&self) -> bool {
        self.disconnected
    }
}
