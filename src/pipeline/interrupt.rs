//! Barge-in detection during playback.

use crate::pipeline::types::AudioFrame;
use tracing::debug;

/// Watches classified frames while the assistant is speaking.
///
/// Reports barge-in once `required_frames` consecutive speech frames are
/// seen, returning those frames so they can open the next utterance. A
/// silence frame resets the run. The monitor only counts while armed.
#[derive(Debug)]
pub struct InterruptMonitor {
    required_frames: usize,
    armed: bool,
    run: Vec<AudioFrame>,
}

impl InterruptMonitor {
    pub fn new(required_frames: usize) -> Self {
        Self {
            required_frames: required_frames.max(1),
            armed: false,
            run: Vec::new(),
        }
    }

    pub fn required_frames(&self) -> usize {
        self.required_frames
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Starts watching with an empty speech run.
    pub fn arm(&mut self) {
        if !self.armed {
            debug!("interrupt monitor armed");
        }
        self.armed = true;
        self.run.clear();
    }

    /// Stops watching and forgets any partial run.
    pub fn disarm(&mut self) {
        self.armed = false;
        self.run.clear();
    }

    /// Observes one classified frame.
    ///
    /// Returns the sustained speech frames when barge-in triggers; the
    /// monitor disarms itself at that point.
    pub fn observe(&mut self, frame: AudioFrame) -> Option<Vec<AudioFrame>> {
        if !self.armed {
            return None;
        }
        if !frame.is_speech() {
            self.run.clear();
            return None;
        }
        if let Some(last) = self.run.last()
            && frame.sequence != last.sequence + 1
        {
            self.run.clear();
        }
        self.run.push(frame);
        if self.run.len() >= self.required_frames {
            self.armed = false;
            let frames = std::mem::take(&mut self.run);
            debug!(
                first = frames.first().map(|f| f.sequence),
                frames = frames.len(),
                "barge-in detected"
            );
            return Some(frames);
        }
        None
    }
}
