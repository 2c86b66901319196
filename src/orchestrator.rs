//! Turn-level state machine.
//!
//! Runs on its own thread and consumes [`ListenerEvent`]s. For each
//! utterance it walks Transcribing → Retrieving → Generating → Speaking and
//! returns to Listening. Every adapter call is bounded by a timeout and every
//! adapter failure ends the turn instead of the session.
//!
//! Barge-in is handled by the listener through the [`TurnGate`]: once it has
//! cancelled playback the orchestrator records what happened to the audio
//! and leaves the conversation state alone.
//!
//! [`TurnGate`]: crate::session::TurnGate

use crate::adapters::{
    Adapters, ContextChunk, PromptContext, call_with_timeout, clean_response, is_non_speech,
};
use crate::audio::playback::{CancelToken, PlaybackController, PlaybackOutcome};
use crate::defaults;
use crate::error::ParlanceError;
use crate::pipeline::types::{ListenerEvent, Utterance};
use crate::session::{AudioHandle, AudioState, ConversationState, ConversationTurn, Session, SessionEvent};
use crossbeam_channel::Receiver;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Orchestrator tuning.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on each adapter call.
    pub adapter_timeout: Duration,
    /// Transcripts below this confidence are discarded.
    pub min_confidence: f32,
    /// Previous turns included in the prompt.
    pub history_turns: usize,
    /// Document chunks retrieved per turn.
    pub top_k: usize,
    /// Duration of one playback frame, used to report how much was heard.
    pub frame_ms: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            adapter_timeout: defaults::ADAPTER_TIMEOUT,
            min_confidence: defaults::MIN_CONFIDENCE,
            history_turns: defaults::HISTORY_TURNS,
            top_k: defaults::RETRIEVAL_TOP_K,
            frame_ms: defaults::FRAME_MS,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Empty, non-speech or low-confidence transcript; no turn recorded.
    Discarded,
    /// An adapter failed; the conversation went back to listening.
    Failed { stage: &'static str, message: String },
    /// Reply recorded without speech output.
    Answered,
    /// Reply recorded and played to the end.
    Spoken,
    /// Playback cut short by barge-in.
    Interrupted { played_ms: u64 },
    /// Barge-in or shutdown stopped the turn before playback started.
    Abandoned,
    /// Another turn held the pipeline.
    Skipped,
}

pub struct ConversationOrchestrator {
    session: Session,
    adapters: Adapters,
    playback: Option<PlaybackController>,
    config: OrchestratorConfig,
    turns_handled: u64,
}

impl ConversationOrchestrator {
    /// `playback` is `None` when speech output is disabled; synthesis is
    /// then skipped even if a synthesis adapter is configured.
    pub fn new(
        session: Session,
        adapters: Adapters,
        playback: Option<PlaybackController>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            session,
            adapters,
            playback,
            config,
            turns_handled: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn speaks(&self) -> bool {
        self.playback.is_some() && self.adapters.synthesis.is_some()
    }

    /// Speaks `text` as an assistant turn at session start.
    ///
    /// Skipped when speech output is disabled or the user already started
    /// a turn.
    pub fn greet(&mut self, text: &str) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() || !self.speaks() {
            return TurnOutcome::Skipped;
        }
        let gate = self.session.gate().clone();
        if !gate.transition(ConversationState::Listening, ConversationState::Generating) {
            return TurnOutcome::Skipped;
        }

        let audio = AudioHandle::new();
        let turn = self.session.transcript().append(ConversationTurn::Assistant {
            text: text.to_string(),
            audio: Some(audio.clone()),
        });
        self.session.events().emit(SessionEvent::TurnAppended(turn));
        info!("greeting");
        self.speak(text, &audio)
    }

    /// Handles one listener event. Barge-in needs no action here.
    pub fn handle_event(&mut self, event: ListenerEvent) -> Option<TurnOutcome> {
        match event {
            ListenerEvent::Utterance(utterance) => Some(self.handle_utterance(utterance)),
            ListenerEvent::BargeIn {
                first_sequence,
                carried_frames,
            } => {
                debug!(first_sequence, carried_frames, "barge-in observed by orchestrator");
                None
            }
        }
    }

    /// Runs one utterance through transcription, retrieval, generation and
    /// speech.
    ///
    /// The listener has already moved the state to `Transcribing`.
    pub fn handle_utterance(&mut self, utterance: Utterance) -> TurnOutcome {
        let started = Instant::now();
        self.turns_handled += 1;
        let outcome = self.run_turn(utterance);
        info!(
            turn = self.turns_handled,
            ?outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );
        outcome
    }

    fn run_turn(&mut self, utterance: Utterance) -> TurnOutcome {
        let gate = self.session.gate().clone();
        let timeout = self.config.adapter_timeout;

        // Transcribing
        let audio = utterance.into_samples();
        let transcriber = self.adapters.transcription.clone();
        let transcription = match call_with_timeout("transcription", timeout, move |cancel| {
            transcriber.transcribe_cancellable(&audio, cancel)
        }) {
            Ok(t) => t,
            Err(e) => return self.fail("transcription", e),
        };

        let text = transcription.text.trim().to_string();
        if is_non_speech(&text) {
            debug!(raw = %transcription.text, "discarding empty transcript");
            gate.end_turn();
            return TurnOutcome::Discarded;
        }
        if let Some(confidence) = transcription.confidence
            && confidence < self.config.min_confidence
        {
            debug!(confidence, text = %text, "discarding low-confidence transcript");
            gate.end_turn();
            return TurnOutcome::Discarded;
        }
        info!(text = %text, "user said");

        // Retrieving
        let history = self.session.transcript().recent(self.config.history_turns);
        let mut context = PromptContext::new(text.clone()).with_history(history);
        if let Some(document) = self.session.document().snapshot() {
            if !gate.advance(ConversationState::Retrieving) {
                return self.abandon();
            }
            let chunks: Vec<ContextChunk> = document
                .retrieve(&text, self.config.top_k)
                .into_iter()
                .map(ContextChunk::from)
                .collect();
            debug!(document = document.name(), chunks = chunks.len(), "retrieved context");
            context = context.with_chunks(chunks);
        }

        // Generating
        if !gate.advance(ConversationState::Generating) {
            return self.abandon();
        }
        let generator = self.adapters.generation.clone();
        let raw = match call_with_timeout("generation", timeout, move |cancel| {
            generator.generate_cancellable(&context, cancel)
        }) {
            Ok(raw) => raw,
            Err(e) => return self.fail("generation", e),
        };
        let reply = clean_response(&raw);

        let audio = self.speaks().then(AudioHandle::new);
        let (user, assistant) = self.session.transcript().append_exchange(
            ConversationTurn::User { text },
            ConversationTurn::Assistant {
                text: reply.clone(),
                audio: audio.clone(),
            },
        );
        self.session.events().emit(SessionEvent::TurnAppended(user));
        self.session.events().emit(SessionEvent::TurnAppended(assistant));
        info!(reply = %reply, "assistant replied");

        match audio {
            Some(audio) => self.speak(&reply, &audio),
            None => {
                gate.end_turn();
                TurnOutcome::Answered
            }
        }
    }

    /// Speaking: synthesizes and plays `text`, recording the result in `audio`.
    fn speak(&self, text: &str, audio: &AudioHandle) -> TurnOutcome {
        let gate = self.session.gate().clone();
        let (Some(synthesizer), Some(playback)) =
            (self.adapters.synthesis.clone(), self.playback.as_ref())
        else {
            gate.end_turn();
            return TurnOutcome::Answered;
        };

        let token = CancelToken::new();
        if !gate.begin_speaking(token.clone()) {
            audio.set(AudioState::Abandoned);
            return self.abandon();
        }

        let owned = text.to_string();
        let clip = match call_with_timeout("synthesis", self.config.adapter_timeout, move |cancel| {
            synthesizer.synthesize_cancellable(&owned, cancel)
        }) {
            Ok(clip) => clip,
            Err(e) => {
                audio.set(AudioState::Failed {
                    message: e.to_string(),
                });
                self.notice("synthesis", &e);
                gate.finish_speaking();
                return TurnOutcome::Failed {
                    stage: "synthesis",
                    message: e.to_string(),
                };
            }
        };

        if token.is_cancelled() {
            audio.set(AudioState::Abandoned);
            return TurnOutcome::Abandoned;
        }

        let duration_ms = clip.duration_ms();
        audio.set(AudioState::Synthesized { duration_ms });
        let outcome = playback.play(clip, token).and_then(|handle| handle.wait());

        match outcome {
            Ok(PlaybackOutcome::Completed { .. }) => {
                audio.set(AudioState::Played { duration_ms });
                gate.finish_speaking();
                TurnOutcome::Spoken
            }
            Ok(PlaybackOutcome::Cancelled { frames_played, .. }) => {
                let played_ms =
                    (frames_played as u64 * self.config.frame_ms as u64).min(duration_ms);
                audio.set(AudioState::Truncated {
                    played_ms,
                    duration_ms,
                });
                info!(played_ms, duration_ms, "playback interrupted");
                TurnOutcome::Interrupted { played_ms }
            }
            Ok(PlaybackOutcome::Failed { message, .. }) => {
                warn!("playback failed: {message}");
                audio.set(AudioState::Failed {
                    message: message.clone(),
                });
                gate.finish_speaking();
                TurnOutcome::Failed {
                    stage: "playback",
                    message,
                }
            }
            Err(e) => {
                warn!("playback failed: {e}");
                audio.set(AudioState::Failed {
                    message: e.to_string(),
                });
                gate.finish_speaking();
                TurnOutcome::Failed {
                    stage: "playback",
                    message: e.to_string(),
                }
            }
        }
    }

    fn notice(&self, stage: &'static str, error: &ParlanceError) {
        warn!(stage, "{error}");
        self.session
            .events()
            .emit(SessionEvent::Notice(format!("{stage} failed: {error}")));
    }

    /// The gate closed under a busy turn.
    fn abandon(&self) -> TurnOutcome {
        debug!("session closing, turn abandoned");
        self.session.gate().end_turn();
        TurnOutcome::Abandoned
    }

    fn fail(&self, stage: &'static str, error: ParlanceError) -> TurnOutcome {
        self.notice(stage, &error);
        self.session.gate().end_turn();
        TurnOutcome::Failed {
            stage,
            message: error.to_string(),
        }
    }

    /// Consumes events until the listener disconnects, then releases the
    /// output device.
    pub fn run(mut self, events: Receiver<ListenerEvent>) {
        for event in events {
            self.handle_event(event);
        }
        if let Some(mut playback) = self.playback.take() {
            playback.shutdown();
        }
        debug!(turns = self.turns_handled, "orchestrator finished");
    }
}
