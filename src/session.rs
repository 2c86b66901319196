//! Session state shared by the listener, the orchestrator and presentation.
//!
//! The [`TurnGate`] holds the conversation state. The listener and the
//! orchestrator only change it through the gate's methods, which makes the
//! barge-in edge and the end of playback mutually exclusive.

use crate::audio::playback::CancelToken;
use crate::document::{DocumentId, DocumentIndex, DocumentLoader};
use crate::error::Result;
use crossbeam_channel::Sender;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info};

/// Top-level conversation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ConversationState {
    Listening = 0,
    Transcribing = 1,
    Retrieving = 2,
    Generating = 3,
    Speaking = 4,
}

impl ConversationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConversationState::Transcribing,
            2 => ConversationState::Retrieving,
            3 => ConversationState::Generating,
            4 => ConversationState::Speaking,
            _ => ConversationState::Listening,
        }
    }

    /// True while an utterance is being transcribed or answered.
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ConversationState::Transcribing
                | ConversationState::Retrieving
                | ConversationState::Generating
        )
    }
}

/// Notifications for a presentation layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(ConversationState),
    TurnAppended(Arc<ConversationTurn>),
    BargeIn,
    /// A recoverable problem worth showing the user.
    Notice(String),
}

/// Optional, non-blocking event channel.
#[derive(Debug, Clone, Default)]
pub struct EventSink(Option<Sender<SessionEvent>>);

impl EventSink {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self(Some(tx))
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.0 {
            let _ = tx.try_send(event);
        }
    }
}

/// Conversation state plus the cancel token of the playback in progress.
///
/// Every transition takes the `playback` lock, so [`TurnGate::close`]
/// either cancels a turn's playback or keeps it from starting.
#[derive(Debug)]
pub struct TurnGate {
    state: AtomicU8,
    playback: Mutex<Option<CancelToken>>,
    closed: AtomicBool,
    events: EventSink,
}

impl TurnGate {
    pub fn new(events: EventSink) -> Self {
        Self {
            state: AtomicU8::new(ConversationState::Listening as u8),
            playback: Mutex::new(None),
            closed: AtomicBool::new(false),
            events,
        }
    }

    pub fn state(&self) -> ConversationState {
        ConversationState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True once the session is shutting down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn store(&self, next: ConversationState) {
        let previous = self.state.swap(next as u8, Ordering::SeqCst);
        if previous != next as u8 {
            debug!(from = ?ConversationState::from_u8(previous), to = ?next, "conversation state");
            self.events.emit(SessionEvent::StateChanged(next));
        }
    }

    /// Moves from `from` to `to` only if the state is still `from` and the
    /// gate is open.
    pub fn transition(&self, from: ConversationState, to: ConversationState) -> bool {
        let Ok(_playback) = self.playback.lock() else {
            return false;
        };
        if self.is_closed() {
            return false;
        }
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved && from != to {
            debug!(from = ?from, to = ?to, "conversation state");
            self.events.emit(SessionEvent::StateChanged(to));
        }
        moved
    }

    /// Claims the pipeline for a new utterance. False if a turn is in flight
    /// or the gate is closed.
    pub fn begin_turn(&self) -> bool {
        self.transition(ConversationState::Listening, ConversationState::Transcribing)
    }

    /// Moves a busy turn to the next processing stage.
    ///
    /// Returns false once the gate is closed; the turn should stop.
    pub fn advance(&self, next: ConversationState) -> bool {
        let Ok(_playback) = self.playback.lock() else {
            return false;
        };
        if self.is_closed() {
            return false;
        }
        self.store(next);
        true
    }

    /// Enters `Speaking` with the token that cancels this turn's playback.
    ///
    /// Returns false once the gate is closed; nothing may be played then.
    pub fn begin_speaking(&self, token: CancelToken) -> bool {
        let Ok(mut playback) = self.playback.lock() else {
            return false;
        };
        if self.is_closed() {
            return false;
        }
        *playback = Some(token);
        self.store(ConversationState::Speaking);
        true
    }

    /// Barge-in edge: cancels playback and returns to `Listening`.
    ///
    /// Returns false if the assistant was not speaking.
    pub fn barge_in(&self) -> bool {
        let Ok(mut playback) = self.playback.lock() else {
            return false;
        };
        if self.state() != ConversationState::Speaking {
            return false;
        }
        if let Some(token) = playback.take() {
            token.cancel();
        }
        self.store(ConversationState::Listening);
        self.events.emit(SessionEvent::BargeIn);
        true
    }

    /// Ends `Speaking` after playback completed.
    ///
    /// Returns false if barge-in already ended it.
    pub fn finish_speaking(&self) -> bool {
        let Ok(mut playback) = self.playback.lock() else {
            return false;
        };
        if self.state() != ConversationState::Speaking {
            return false;
        }
        playback.take();
        self.store(ConversationState::Listening);
        true
    }

    /// Abandons a busy turn (discarded transcript, adapter failure).
    pub fn end_turn(&self) {
        if let Ok(mut playback) = self.playback.lock()
            && self.state().is_busy()
        {
            playback.take();
            self.store(ConversationState::Listening);
        }
    }

    /// Unconditionally returns to `Listening`, cancelling any playback.
    pub fn reset(&self) {
        if let Ok(mut playback) = self.playback.lock() {
            if let Some(token) = playback.take() {
                token.cancel();
            }
            self.store(ConversationState::Listening);
        }
    }

    /// Shuts the gate: cancels playback and refuses every later turn,
    /// stage change and playback until [`TurnGate::open`].
    ///
    /// The state stays where it is so a turn in flight still reads as busy.
    pub fn close(&self) {
        if let Ok(mut playback) = self.playback.lock() {
            self.closed.store(true, Ordering::SeqCst);
            if let Some(token) = playback.take() {
                token.cancel();
            }
            if self.state() == ConversationState::Speaking {
                self.store(ConversationState::Listening);
            }
        }
    }

    /// Re-opens a closed gate in `Listening`.
    pub fn open(&self) {
        if let Ok(mut playback) = self.playback.lock() {
            playback.take();
            self.closed.store(false, Ordering::SeqCst);
            self.store(ConversationState::Listening);
        }
    }
}

/// Playback status of an assistant turn's audio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AudioState {
    /// Not synthesized yet.
    Pending,
    Synthesized { duration_ms: u64 },
    Played { duration_ms: u64 },
    /// Cut short by barge-in.
    Truncated { played_ms: u64, duration_ms: u64 },
    /// Barge-in or shutdown arrived before playback started.
    Abandoned,
    Failed { message: String },
}

/// Shared reference to an assistant turn's audio.
///
/// The turn itself never changes; the handle tracks what happened to the
/// audio after the turn was recorded.
#[derive(Debug, Clone)]
pub struct AudioHandle(Arc<Mutex<AudioState>>);

impl AudioHandle {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(AudioState::Pending)))
    }

    pub fn state(&self) -> AudioState {
        self.0
            .lock()
            .map(|s| s.clone())
            .unwrap_or(AudioState::Failed {
                message: "audio state poisoned".to_string(),
            })
    }

    pub fn set(&self, state: AudioState) {
        if let Ok(mut current) = self.0.lock() {
            *current = state;
        }
    }
}

impl Default for AudioHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Serialize for AudioHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.state().serialize(serializer)
    }
}

/// One entry in the session transcript.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ConversationTurn {
    User {
        text: String,
    },
    Assistant {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<AudioHandle>,
    },
}

impl ConversationTurn {
    pub fn text(&self) -> &str {
        match self {
            ConversationTurn::User { text } | ConversationTurn::Assistant { text, .. } => text,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, ConversationTurn::User { .. })
    }

    pub fn audio(&self) -> Option<&AudioHandle> {
        match self {
            ConversationTurn::Assistant { audio, .. } => audio.as_ref(),
            ConversationTurn::User { .. } => None,
        }
    }
}

/// Append-only, ordered list of turns.
///
/// Readers get a snapshot of complete turns; a reader never sees a user
/// turn whose assistant reply is still being appended.
#[derive(Debug, Default)]
pub struct Transcript {
    turns: RwLock<Vec<Arc<ConversationTurn>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a single turn.
    pub fn append(&self, turn: ConversationTurn) -> Arc<ConversationTurn> {
        let turn = Arc::new(turn);
        if let Ok(mut turns) = self.turns.write() {
            turns.push(turn.clone());
        }
        turn
    }

    /// Appends a user turn and its reply under one lock.
    pub fn append_exchange(
        &self,
        user: ConversationTurn,
        assistant: ConversationTurn,
    ) -> (Arc<ConversationTurn>, Arc<ConversationTurn>) {
        let user = Arc::new(user);
        let assistant = Arc::new(assistant);
        if let Ok(mut turns) = self.turns.write() {
            turns.push(user.clone());
            turns.push(assistant.clone());
        }
        (user, assistant)
    }

    pub fn snapshot(&self) -> Vec<Arc<ConversationTurn>> {
        self.turns.read().map(|t| t.clone()).unwrap_or_default()
    }

    /// The last `n` turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<ConversationTurn>> {
        self.turns
            .read()
            .map(|t| t[t.len().saturating_sub(n)..].to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.turns.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the transcript as a JSON array.
    pub fn to_json(&self) -> Result<String> {
        let turns = self.snapshot();
        let turns: Vec<&ConversationTurn> = turns.iter().map(|t| t.as_ref()).collect();
        serde_json::to_string_pretty(&turns)
            .map_err(|e| crate::error::ParlanceError::Other(format!("transcript JSON: {e}")))
    }

    fn clear(&self) {
        if let Ok(mut turns) = self.turns.write() {
            turns.clear();
        }
    }
}

/// Process-wide conversation state.
#[derive(Debug, Clone)]
pub struct Session {
    transcript: Arc<Transcript>,
    gate: Arc<TurnGate>,
    document: Arc<DocumentIndex>,
    events: EventSink,
}

impl Session {
    pub fn new(events: EventSink) -> Self {
        Self::with_document_index(events, DocumentIndex::new())
    }

    /// Creates a session whose documents are chunked by `document`.
    pub fn with_document_index(events: EventSink, document: DocumentIndex) -> Self {
        Self {
            transcript: Arc::new(Transcript::new()),
            gate: Arc::new(TurnGate::new(events.clone())),
            document: Arc::new(document),
            events,
        }
    }

    pub fn transcript(&self) -> &Arc<Transcript> {
        &self.transcript
    }

    pub fn gate(&self) -> &Arc<TurnGate> {
        &self.gate
    }

    pub fn document(&self) -> &Arc<DocumentIndex> {
        &self.document
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn state(&self) -> ConversationState {
        self.gate.state()
    }

    /// Starts a new conversation: clears the transcript and the document.
    pub fn reset(&self) {
        self.gate.reset();
        self.transcript.clear();
        self.document.clear();
        info!("session reset");
    }

    /// Loads a document through `loader` and makes it the active grounding source.
    ///
    /// On failure the previous document stays active.
    pub fn upload_document(&self, path: &Path, loader: &DocumentLoader) -> Result<DocumentId> {
        let loaded = loader.load(path)?;
        let id = self.document.ingest(&loaded.name, &loaded.text)?;
        if let Some(document) = self.document.snapshot() {
            info!(
                name = %loaded.name,
                chunks = document.chunks().len(),
                words = document.word_count(),
                "document loaded"
            );
            self.events.emit(SessionEvent::Notice(format!(
                "Loaded {} ({} words)",
                loaded.name,
                document.word_count()
            )));
        }
        Ok(id)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EventSink::default())
    }
}
