//! The endpoint/interrupt worker.
//!
//! Consumes classified frames in capture order and drives either the
//! endpointer or the interrupt monitor, depending on the conversation state.
//! Both read the tag the classifier already set; no frame is classified twice.

use crate::pipeline::endpointer::{EndpointState, Endpointer};
use crate::pipeline::error::StationError;
use crate::pipeline::interrupt::InterruptMonitor;
use crate::pipeline::station::Station;
use crate::pipeline::types::{AudioFrame, ListenerEvent};
use crate::session::{ConversationState, TurnGate};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ListenerStation {
    endpointer: Endpointer,
    monitor: InterruptMonitor,
    gate: Arc<TurnGate>,
    last_state: ConversationState,
    dropped_while_busy: u64,
}

impl ListenerStation {
    pub fn new(endpointer: Endpointer, monitor: InterruptMonitor, gate: Arc<TurnGate>) -> Self {
        let last_state = gate.state();
        Self {
            endpointer,
            monitor,
            gate,
            last_state,
            dropped_while_busy: 0,
        }
    }

    pub fn endpoint_state(&self) -> EndpointState {
        self.endpointer.state()
    }

    fn on_state_change(&mut self, state: ConversationState) {
        match state {
            ConversationState::Speaking => {
                self.endpointer.reset();
                self.monitor.arm();
            }
            ConversationState::Listening => {
                // Playback finished normally; start from a clean slate.
                self.monitor.disarm();
                self.endpointer.reset();
            }
            _ => {
                self.monitor.disarm();
                self.endpointer.reset();
            }
        }
        self.last_state = state;
    }

    fn listen(&mut self, frame: AudioFrame) -> Option<ListenerEvent> {
        let utterance = self.endpointer.push(frame)?;
        if self.gate.begin_turn() {
            self.last_state = ConversationState::Transcribing;
            info!(
                frames = utterance.len(),
                duration_ms = utterance.duration_ms(),
                "utterance detected"
            );
            Some(ListenerEvent::Utterance(utterance))
        } else {
            debug!("utterance dropped, a turn is already in flight");
            None
        }
    }

    fn watch(&mut self, frame: AudioFrame) -> Option<ListenerEvent> {
        let frames = self.monitor.observe(frame)?;
        if !self.gate.barge_in() {
            // Playback ended on its own while the run was building up.
            return None;
        }
        self.last_state = ConversationState::Listening;
        let first_sequence = frames.first().map(|f| f.sequence).unwrap_or(0);
        let carried_frames = frames.len();
        info!(first_sequence, carried_frames, "barge-in");
        self.endpointer.resume_with(frames);
        Some(ListenerEvent::BargeIn {
            first_sequence,
            carried_frames,
        })
    }
}

impl Station for ListenerStation {
    type Input = AudioFrame;
    type Output = ListenerEvent;

    fn name(&self) -> &'static str {
        "listener"
    }

    fn process(&mut self, frame: AudioFrame) -> Result<Option<ListenerEvent>, StationError> {
        let state = self.gate.state();
        if state != self.last_state {
            self.on_state_change(state);
        }

        match state {
            ConversationState::Listening => Ok(self.listen(frame)),
            ConversationState::Speaking => Ok(self.watch(frame)),
            ConversationState::Transcribing
            | ConversationState::Retrieving
            | ConversationState::Generating => {
                self.dropped_while_busy += 1;
                Ok(None)
            }
        }
    }

    fn shutdown(&mut self) {
        debug!(dropped_while_busy = self.dropped_while_busy, "listener finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::CancelToken;
    use crate::audio::vad::VoiceActivity;
    use crate::pipeline::endpointer::EndpointerConfig;
    use crate::session::EventSink;

    fn frame(sequence: u64, speech: bool) -> AudioFrame {
        let activity = if speech {
            VoiceActivity::Speech
        } else {
            VoiceActivity::Silence
        };
        AudioFrame::new(vec![0; 480], sequence, 16000).classified(activity)
    }

    fn listener(gate: Arc<TurnGate>) -> ListenerStation {
        ListenerStation::new(
            Endpointer::new(EndpointerConfig {
                debounce_frames: 3,
                hangover_frames: 4,
                max_utterance_frames: None,
            }),
            InterruptMonitor::new(2),
            gate,
        )
    }

    fn feed(
        station: &mut ListenerStation,
        start: u64,
        pattern: &[bool],
    ) -> Vec<ListenerEvent> {
        pattern
            .iter()
            .enumerate()
            .filter_map(|(i, &speech)| station.process(frame(start + i as u64, speech)).unwrap())
            .collect()
    }

    #[test]
    fn test_utterance_claims_the_turn() {
        let gate = Arc::new(TurnGate::new(EventSink::default()));
        let mut station = listener(gate.clone());

        let mut pattern = vec![true; 5];
        pattern.extend(vec![false; 4]);
        let events = feed(&mut station, 0, &pattern);

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ListenerEvent::Utterance(u) if u.len() == 9));
        assert_eq!(gate.state(), ConversationState::Transcribing);
    }

    #[test]
    fn test_frames_dropped_while_busy() {
        let gate = Arc::new(TurnGate::new(EventSink::default()));
        gate.begin_turn();
        let mut station = listener(gate.clone());

        let events = feed(&mut station, 0, &[true; 20]);
        assert!(events.is_empty());
        assert_eq!(station.endpoint_state(), EndpointState::Idle);
    }

    #[test]
    fn test_barge_in_seeds_next_utterance() {
        let gate = Arc::new(TurnGate::new(EventSink::default()));
        let mut station = listener(gate.clone());
        let token = CancelToken::new();
        gate.begin_speaking(token.clone());

        let events = feed(&mut station, 100, &[false, true, true]);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            ListenerEvent::BargeIn {
                first_sequence: 101,
                carried_frames: 2
            }
        ));
        assert!(token.is_cancelled());
        assert_eq!(gate.state(), ConversationState::Listening);
        assert_eq!(station.endpoint_state(), EndpointState::InSpeech);

        // The continuing speech and its hangover complete an utterance that
        // starts at the first interrupting frame.
        let events = feed(&mut station, 103, &[true, false, false, false, false]);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ListenerEvent::Utterance(utterance) => {
                assert_eq!(utterance.first_sequence(), 101);
                assert_eq!(utterance.len(), 7);
            }
            other => panic!("expected utterance, got {other:?}"),
        }
    }

    #[test]
    fn test_short_noise_during_playback_is_ignored() {
        let gate = Arc::new(TurnGate::new(EventSink::default()));
        let mut station = listener(gate.clone());
        let token = CancelToken::new();
        gate.begin_speaking(token.clone());

        let events = feed(&mut station, 0, &[true, false, true, false]);
        assert!(events.is_empty());
        assert!(!token.is_cancelled());
        assert_eq!(gate.state(), ConversationState::Speaking);
    }

    #[test]
    fn test_playback_end_returns_to_endpointing() {
        let gate = Arc::new(TurnGate::new(EventSink::default()));
        let mut station = listener(gate.clone());
        gate.begin_speaking(CancelToken::new());
        feed(&mut station, 0, &[true]);

        gate.finish_speaking();
        let mut pattern = vec![true; 3];
        pattern.extend(vec![false; 4]);
        let events = feed(&mut station, 1, &pattern);
        assert!(matches!(&events[0], ListenerEvent::Utterance(u) if u.first_sequence() == 1));
    }
}
