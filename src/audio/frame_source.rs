//! Continuous capture into a bounded frame queue.
//!
//! The capture worker cuts whatever the device delivers into fixed-size
//! frames and pushes them into a bounded channel. When the consumer falls
//! behind, the oldest queued frame is overwritten; the device callback is
//! never blocked.

use crate::audio::source::AudioSource;
use crate::audio::vad::FrameFormat;
use crate::defaults;
use crate::error::{ParlanceError, Result};
use crate::pipeline::types::AudioFrame;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Configuration for the capture worker.
#[derive(Debug, Clone, Copy)]
pub struct FrameSourceConfig {
    /// Sample rate and frame duration of emitted frames.
    pub format: FrameFormat,
    /// Queue capacity in frames.
    pub queue_capacity: usize,
    /// Sleep between reads when the device has nothing new.
    pub poll_interval: Duration,
    /// Consecutive read errors tolerated before capture gives up.
    pub max_consecutive_errors: u32,
}

impl Default for FrameSourceConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            queue_capacity: defaults::FRAME_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(10),
            max_consecutive_errors: 10,
        }
    }
}

/// Owns the input device for the lifetime of the capture worker.
pub struct AudioFrameSource {
    config: FrameSourceConfig,
    source: Option<Box<dyn AudioSource>>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
    worker: Option<JoinHandle<Box<dyn AudioSource>>>,
    drain_rx: Option<Receiver<AudioFrame>>,
}

impl AudioFrameSource {
    pub fn new(source: Box<dyn AudioSource>, config: FrameSourceConfig) -> Self {
        Self {
            config,
            source: Some(source),
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            failure: Arc::new(Mutex::new(None)),
            worker: None,
            drain_rx: None,
        }
    }

    /// Opens the device and starts the capture worker.
    ///
    /// Returns the receiving end of the frame queue.
    ///
    /// # Errors
    /// `DeviceUnavailable` if the device cannot be opened. This is surfaced
    /// here, on the caller's thread, and never retried.
    pub fn start(&mut self) -> Result<Receiver<AudioFrame>> {
        let mut source = self
            .source
            .take()
            .ok_or_else(|| ParlanceError::Other("audio capture already started".to_string()))?;

        if let Err(e) = source.start() {
            self.source = Some(source);
            return Err(e);
        }

        let capacity = self.config.queue_capacity.max(1);
        let (tx, rx) = bounded(capacity);
        let overflow_rx = rx.clone();
        self.drain_rx = Some(rx.clone());
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let dropped = self.dropped.clone();
        let failure = self.failure.clone();
        let config = self.config;
        self.worker = Some(thread::spawn(move || {
            capture_loop(source, config, tx, overflow_rx, running, dropped, failure)
        }));

        Ok(rx)
    }

    /// Stops capture, releases the device and drains the queue.
    ///
    /// Returns the number of frames discarded from the queue.
    pub fn stop(&mut self) -> Result<usize> {
        self.running.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(mut source) => {
                    source.stop()?;
                    self.source = Some(source);
                }
                Err(_) => {
                    return Err(ParlanceError::Other(
                        "audio capture thread panicked".to_string(),
                    ));
                }
            }
        }

        let mut drained = 0;
        if let Some(rx) = self.drain_rx.take() {
            while rx.try_recv().is_ok() {
                drained += 1;
            }
        }
        Ok(drained)
    }

    /// True while the capture worker is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Why capture stopped on its own, if it gave up on the device.
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }

    /// Frames overwritten because the consumer fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for AudioFrameSource {
    fn drop(&mut self) {
        if self.worker.is_some()
            && let Err(e) = self.stop()
        {
            warn!("failed to stop audio capture: {e}");
        }
    }
}

fn capture_loop(
    mut source: Box<dyn AudioSource>,
    config: FrameSourceConfig,
    tx: Sender<AudioFrame>,
    overflow_rx: Receiver<AudioFrame>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    failure: Arc<Mutex<Option<String>>>,
) -> Box<dyn AudioSource> {
    let frame_len = config.format.samples_per_frame().max(1);
    let mut pending: Vec<i16> = Vec::with_capacity(frame_len * 2);
    let mut sequence: u64 = 0;
    let mut consecutive_errors: u32 = 0;

    'capture: while running.load(Ordering::SeqCst) {
        match source.read_samples() {
            Ok(samples) if samples.is_empty() => {
                if source.is_finite() {
                    debug!(frames = sequence, "audio source exhausted");
                    break;
                }
                thread::sleep(config.poll_interval);
                continue;
            }
            Ok(samples) => {
                consecutive_errors = 0;
                pending.extend_from_slice(&samples);
            }
            Err(e) => {
                consecutive_errors += 1;
                if consecutive_errors >= config.max_consecutive_errors {
                    error!("audio capture failed {consecutive_errors} times in a row: {e}");
                    if let Ok(mut failure) = failure.lock() {
                        *failure = Some(e.to_string());
                    }
                    break;
                }
                thread::sleep(config.poll_interval);
                continue;
            }
        }

        while pending.len() >= frame_len {
            let samples: Vec<i16> = pending.drain(..frame_len).collect();
            let frame = AudioFrame::new(samples, sequence, config.format.sample_rate);
            sequence += 1;
            if !push_overwriting(&tx, &overflow_rx, frame, &dropped) {
                break 'capture;
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    source
}

/// Pushes a frame, evicting the oldest queued frame while the queue is full.
///
/// Returns false if the queue is disconnected.
fn push_overwriting(
    tx: &Sender<AudioFrame>,
    overflow_rx: &Receiver<AudioFrame>,
    mut frame: AudioFrame,
    dropped: &AtomicU64,
) -> bool {
    loop {
        match tx.try_send(frame) {
            Ok(()) => return true,
            Err(TrySendError::Full(rejected)) => {
                if overflow_rx.try_recv().is_ok() {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                frame = rejected;
            }
            Err(TrySendError::Disconnected(_)) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::{MockAudioSource, ScriptedAudioSource};

    fn config(capacity: usize) -> FrameSourceConfig {
        FrameSourceConfig {
            queue_capacity: capacity,
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn wait_until_stopped(source: &AudioFrameSource) {
        for _ in 0..500 {
            if !source.is_running() {
                return;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("capture worker did not finish");
    }

    #[test]
    fn test_frames_are_fixed_size_and_in_order() {
        // Blocks that do not align with the 480-sample frame size
        let blocks = vec![vec![1i16; 300], vec![2i16; 700], vec![3i16; 440]];
        let mut source =
            AudioFrameSource::new(Box::new(ScriptedAudioSource::new(blocks)), config(16));
        let rx = source.start().unwrap();
        wait_until_stopped(&source);

        let frames: Vec<AudioFrame> = rx.try_iter().collect();
        assert_eq!(frames.len(), 3);
        assert!(source.failure().is_none());
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.sequence, i as u64);
            assert_eq!(frame.samples.len(), 480);
            assert_eq!(frame.sample_rate, 16000);
            assert!(frame.activity.is_none());
        }
        source.stop().unwrap();
    }

    #[test]
    fn test_overflow_overwrites_oldest() {
        let blocks = (0..10).map(|_| vec![0i16; 480]).collect();
        let mut source =
            AudioFrameSource::new(Box::new(ScriptedAudioSource::new(blocks)), config(4));
        let rx = source.start().unwrap();
        wait_until_stopped(&source);

        let sequences: Vec<u64> = rx.try_iter().map(|f| f.sequence).collect();
        assert_eq!(sequences, vec![6, 7, 8, 9]);
        assert_eq!(source.dropped_frames(), 6);
        source.stop().unwrap();
    }

    #[test]
    fn test_start_failure_is_surfaced() {
        let mut source = AudioFrameSource::new(
            Box::new(MockAudioSource::new().with_start_failure()),
            config(4),
        );
        assert!(matches!(
            source.start(),
            Err(ParlanceError::DeviceUnavailable { .. })
        ));
        assert!(!source.is_running());
    }

    #[test]
    fn test_stop_drains_queue() {
        let mut source = AudioFrameSource::new(
            Box::new(MockAudioSource::new().with_samples(vec![0i16; 480])),
            config(8),
        );
        let _rx = source.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        source.stop().unwrap();
        assert!(!source.is_running());
        assert!(_rx.try_recv().is_err(), "queue should be empty after stop");
    }

    #[test]
    fn test_double_start_is_rejected() {
        let mut source = AudioFrameSource::new(
            Box::new(MockAudioSource::new().with_samples(vec![0i16; 480])),
            config(8),
        );
        let _rx = source.start().unwrap();
        assert!(source.start().is_err());
        source.stop().unwrap();
    }

    #[test]
    fn test_repeated_read_errors_end_capture() {
        let mut source = AudioFrameSource::new(
            Box::new(MockAudioSource::new().with_read_failure()),
            config(8),
        );
        let rx = source.start().unwrap();
        wait_until_stopped(&source);
        assert!(rx.try_recv().is_err());
        assert!(source.failure().is_some());
        source.stop().unwrap();
    }
}
