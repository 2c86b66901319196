//! Station that tags every captured frame as speech or silence.

use crate::audio::vad::{SpeechDetector, VoiceActivity, VoiceActivityClassifier};
use crate::pipeline::error::StationError;
use crate::pipeline::station::Station;
use crate::pipeline::types::AudioFrame;
use tracing::trace;

/// Classifies each frame exactly once.
///
/// The endpointer and the interrupt monitor both read the tag set here.
pub struct ClassifierStation<D: SpeechDetector + 'static> {
    classifier: VoiceActivityClassifier<D>,
    speech_frames: u64,
    total_frames: u64,
}

impl<D: SpeechDetector + 'static> ClassifierStation<D> {
    pub fn new(classifier: VoiceActivityClassifier<D>) -> Self {
        Self {
            classifier,
            speech_frames: 0,
            total_frames: 0,
        }
    }
}

impl<D: SpeechDetector + 'static> Station for ClassifierStation<D> {
    type Input = AudioFrame;
    type Output = AudioFrame;

    fn name(&self) -> &'static str {
        "classifier"
    }

    fn process(&mut self, frame: AudioFrame) -> Result<Option<AudioFrame>, StationError> {
        let format = self.classifier.format();
        if frame.sample_rate != format.sample_rate
            || frame.samples.len() != format.samples_per_frame()
        {
            return Err(StationError::Recoverable(format!(
                "dropping frame {}: {} samples at {}Hz, expected {} at {}Hz",
                frame.sequence,
                frame.samples.len(),
                frame.sample_rate,
                format.samples_per_frame(),
                format.sample_rate
            )));
        }

        let activity = self.classifier.classify(&frame);
        self.total_frames += 1;
        if activity == VoiceActivity::Speech {
            self.speech_frames += 1;
        }
        trace!(sequence = frame.sequence, ?activity, "classified");
        Ok(Some(frame.classified(activity)))
    }

    fn shutdown(&mut self) {
        tracing::debug!(
            total = self.total_frames,
            speech = self.speech_frames,
            "classifier finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::{EnergyDetector, FrameFormat};

    fn station() -> ClassifierStation<EnergyDetector> {
        ClassifierStation::new(
            VoiceActivityClassifier::new(EnergyDetector::default(), FrameFormat::default())
                .unwrap(),
        )
    }

    #[test]
    fn test_tags_frames() {
        let mut station = station();
        let loud = station
            .process(AudioFrame::new(vec![3000; 480], 0, 16000))
            .unwrap()
            .unwrap();
        assert_eq!(loud.activity, Some(VoiceActivity::Speech));

        let quiet = station
            .process(AudioFrame::new(vec![0; 480], 1, 16000))
            .unwrap()
            .unwrap();
        assert_eq!(quiet.activity, Some(VoiceActivity::Silence));
        assert_eq!(quiet.sequence, 1);
    }

    #[test]
    fn test_rejects_mismatched_frames() {
        let mut station = station();
        let err = station
            .process(AudioFrame::new(vec![0; 100], 0, 16000))
            .unwrap_err();
        assert!(!err.is_fatal());
        assert!(
            station
                .process(AudioFrame::new(vec![0; 480], 0, 8000))
                .is_err()
        );
    }
}
