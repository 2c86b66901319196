//! Cancellable audio playback.
//!
//! A single worker thread owns the output device. Clips are written to the
//! sink one frame at a time and the cancel token is checked before every
//! frame, so a barge-in stops output within one frame plus whatever the
//! device has already queued (bounded by `PLAYBACK_QUEUE_FRAMES`).

use crate::error::{ParlanceError, Result};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for audio output devices.
pub trait AudioSink: Send {
    /// Open the device; fails with `DeviceUnavailable` if it cannot.
    fn start(&mut self) -> Result<()>;

    /// Release the device.
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    /// Queue one frame for output. May block to keep the device queue short.
    fn write_frame(&mut self, samples: &[i16]) -> Result<()>;

    /// Discard every queued frame that has not been played yet.
    ///
    /// Must not emit a click or partial frame.
    fn clear(&mut self);

    /// Frames queued on the device and not yet played.
    fn pending_frames(&self) -> usize {
        0
    }
}

/// Shared cancellation flag for one playback.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Synthesized audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// How a playback ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed {
        frames_played: usize,
    },
    Cancelled {
        frames_played: usize,
        frames_discarded: usize,
    },
    Failed {
        frames_played: usize,
        message: String,
    },
}

impl PlaybackOutcome {
    pub fn frames_played(&self) -> usize {
        match self {
            PlaybackOutcome::Completed { frames_played }
            | PlaybackOutcome::Cancelled { frames_played, .. }
            | PlaybackOutcome::Failed { frames_played, .. } => *frames_played,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlaybackOutcome::Cancelled { .. })
    }
}

struct PlaybackRequest {
    clip: AudioClip,
    token: CancelToken,
    reply: Sender<PlaybackOutcome>,
}

/// Handle to a playback in progress.
pub struct PlaybackHandle {
    rx: Receiver<PlaybackOutcome>,
    token: CancelToken,
}

impl PlaybackHandle {
    /// Cancels this playback.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Blocks until playback completes or is cancelled.
    pub fn wait(self) -> Result<PlaybackOutcome> {
        self.rx
            .recv()
            .map_err(|_| ParlanceError::Other("playback worker stopped".to_string()))
    }
}

/// Owns the output device on a dedicated worker thread.
pub struct PlaybackController {
    tx: Option<Sender<PlaybackRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl PlaybackController {
    /// Opens the sink on the caller's thread and spawns the playback worker.
    ///
    /// `frame_samples` is the number of samples written per frame.
    pub fn spawn(mut sink: Box<dyn AudioSink>, frame_samples: usize) -> Result<Self> {
        sink.start()?;

        let (tx, rx) = unbounded::<PlaybackRequest>();
        let frame_samples = frame_samples.max(1);
        let worker = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || {
                for request in rx {
                    let outcome =
                        play_clip(sink.as_mut(), &request.clip, &request.token, frame_samples);
                    debug!(?outcome, "playback finished");
                    let _ = request.reply.send(outcome);
                }
                if let Err(e) = sink.stop() {
                    warn!("failed to stop audio output: {e}");
                }
            })?;

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
        })
    }

    /// Queues a clip for playback. Cancelling `token` stops it.
    pub fn play(&self, clip: AudioClip, token: CancelToken) -> Result<PlaybackHandle> {
        let (reply, rx) = bounded(1);
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ParlanceError::Other("playback controller shut down".to_string()))?;
        tx.send(PlaybackRequest {
            clip,
            token: token.clone(),
            reply,
        })
        .map_err(|_| ParlanceError::Other("playback worker stopped".to_string()))?;
        Ok(PlaybackHandle { rx, token })
    }

    /// Stops the worker after any playback in progress and releases the device.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("playback thread panicked");
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn play_clip(
    sink: &mut dyn AudioSink,
    clip: &AudioClip,
    token: &CancelToken,
    frame_samples: usize,
) -> PlaybackOutcome {
    let total = clip.samples.len().div_ceil(frame_samples);
    let mut written = 0usize;

    for chunk in clip.samples.chunks(frame_samples) {
        if token.is_cancelled() {
            return cancel_playback(sink, written, total);
        }
        if let Err(e) = sink.write_frame(chunk) {
            sink.clear();
            return PlaybackOutcome::Failed {
                frames_played: written.saturating_sub(sink.pending_frames()),
                message: e.to_string(),
            };
        }
        written += 1;
    }

    while sink.pending_frames() > 0 {
        if token.is_cancelled() {
            return cancel_playback(sink, written, total);
        }
        thread::sleep(Duration::from_millis(2));
    }

    PlaybackOutcome::Completed {
        frames_played: written,
    }
}

fn cancel_playback(sink: &mut dyn AudioSink, written: usize, total: usize) -> PlaybackOutcome {
    let pending = sink.pending_frames().min(written);
    sink.clear();
    let frames_played = written - pending;
    PlaybackOutcome::Cancelled {
        frames_played,
        frames_discarded: total - frames_played,
    }
}

/// In-memory sink for tests and headless runs.
///
/// Clones share state, so a test can keep one clone to inspect what the
/// playback worker wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    frames: Arc<Mutex<Vec<Vec<i16>>>>,
    clears: Arc<AtomicUsize>,
    pace: Option<Duration>,
    fail_start: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `frame_duration` on every write, like a real device.
    pub fn paced(mut self, frame_duration: Duration) -> Self {
        self.pace = Some(frame_duration);
        self
    }

    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Frames written so far.
    pub fn frames_written(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    /// All samples written so far.
    pub fn samples(&self) -> Vec<i16> {
        self.frames
            .lock()
            .map(|f| f.concat())
            .unwrap_or_default()
    }

    /// Number of times `clear` was called.
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl AudioSink for MemorySink {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(ParlanceError::DeviceUnavailable {
                device: "memory".to_string(),
                message: "no output device found".to_string(),
            });
        }
        Ok(())
    }

    fn write_frame(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(pace) = self.pace {
            thread::sleep(pace);
        }
        let mut frames = self
            .frames
            .lock()
            .map_err(|e| ParlanceError::Other(format!("memory sink poisoned: {e}")))?;
        frames.push(samples.to_vec());
        Ok(())
    }

    fn clear(&mut self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn clip(frames: usize) -> AudioClip {
        AudioClip::new(vec![500i16; frames * 480], 16000)
    }

    #[test]
    fn test_clip_duration() {
        assert_eq!(clip(100).duration_ms(), 3000);
        assert_eq!(AudioClip::new(vec![0; 10], 0).duration_ms(), 0);
    }

    #[test]
    fn test_plays_clip_to_completion() {
        let sink = MemorySink::new();
        let observer = sink.clone();
        let controller = PlaybackController::spawn(Box::new(sink), 480).unwrap();

        let outcome = controller
            .play(clip(10), CancelToken::new())
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(outcome, PlaybackOutcome::Completed { frames_played: 10 });
        assert_eq!(observer.frames_written(), 10);
        assert_eq!(observer.samples().len(), 4800);
        assert_eq!(observer.clear_count(), 0);
    }

    #[test]
    fn test_partial_last_frame_is_played() {
        let sink = MemorySink::new();
        let observer = sink.clone();
        let controller = PlaybackController::spawn(Box::new(sink), 480).unwrap();

        let outcome = controller
            .play(AudioClip::new(vec![1i16; 1000], 16000), CancelToken::new())
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(outcome.frames_played(), 3);
        assert_eq!(observer.samples().len(), 1000);
    }

    #[test]
    fn test_cancel_stops_within_a_frame() {
        let sink = MemorySink::new().paced(Duration::from_millis(30));
        let observer = sink.clone();
        let controller = PlaybackController::spawn(Box::new(sink), 480).unwrap();

        let token = CancelToken::new();
        let handle = controller.play(clip(100), token.clone()).unwrap();
        thread::sleep(Duration::from_millis(150));
        let cancelled_at = Instant::now();
        token.cancel();
        let outcome = handle.wait().unwrap();

        assert!(cancelled_at.elapsed() < Duration::from_millis(100));
        assert!(outcome.is_cancelled());
        match outcome {
            PlaybackOutcome::Cancelled {
                frames_played,
                frames_discarded,
            } => {
                assert!(frames_played < 20, "played {frames_played}");
                assert_eq!(frames_played + frames_discarded, 100);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
        assert_eq!(observer.clear_count(), 1);
    }

    #[test]
    fn test_pre_cancelled_token_plays_nothing() {
        let sink = MemorySink::new();
        let observer = sink.clone();
        let controller = PlaybackController::spawn(Box::new(sink), 480).unwrap();

        let token = CancelToken::new();
        token.cancel();
        let outcome = controller.play(clip(5), token).unwrap().wait().unwrap();

        assert_eq!(
            outcome,
            PlaybackOutcome::Cancelled {
                frames_played: 0,
                frames_discarded: 5
            }
        );
        assert_eq!(observer.frames_written(), 0);
    }

    #[test]
    fn test_sink_start_failure_is_surfaced() {
        let result = PlaybackController::spawn(Box::new(MemorySink::new().with_start_failure()), 480);
        assert!(matches!(
            result,
            Err(ParlanceError::DeviceUnavailable { .. })
        ));
    }

    #[test]
    fn test_play_after_shutdown_fails() {
        let mut controller = PlaybackController::spawn(Box::new(MemorySink::new()), 480).unwrap();
        controller.shutdown();
        assert!(controller.play(clip(1), CancelToken::new()).is_err());
    }

    #[test]
    fn test_cancel_via_handle() {
        let sink = MemorySink::new().paced(Duration::from_millis(10));
        let controller = PlaybackController::spawn(Box::new(sink), 480).unwrap();
        let handle = controller.play(clip(200), CancelToken::new()).unwrap();
        thread::sleep(Duration::from_millis(30));
        handle.cancel();
        assert!(handle.wait().unwrap().is_cancelled());
    }
}
