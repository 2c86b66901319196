//! Wires capture, classification, listening, orchestration and playback
//! into a running conversation.
//!
//! ```text
//! AudioFrameSource → ClassifierStation → ListenerStation → orchestrator
//!                                            ↑ TurnGate ↓
//!                                     PlaybackController
//! ```
//!
//! Each arrow is a bounded crossbeam channel. Stopping capture disconnects
//! the first channel and every downstream worker exits in order.

use crate::adapters::Adapters;
use crate::audio::frame_source::{AudioFrameSource, FrameSourceConfig};
use crate::audio::playback::{AudioSink, PlaybackController};
use crate::audio::source::AudioSource;
use crate::audio::vad::{EnergyDetector, FrameFormat, VoiceActivityClassifier};
use crate::defaults;
use crate::error::Result;
use crate::orchestrator::{ConversationOrchestrator, OrchestratorConfig};
use crate::pipeline::endpointer::{Endpointer, EndpointerConfig};
use crate::pipeline::error::FatalLatch;
use crate::pipeline::interrupt::InterruptMonitor;
use crate::pipeline::listener::ListenerStation;
use crate::pipeline::station::StationRunner;
use crate::pipeline::types::AudioFrame;
use crate::pipeline::vad_station::ClassifierStation;
use crate::session::Session;
use crossbeam_channel::{Receiver, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Everything needed to start a conversation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub format: FrameFormat,
    /// Capture queue capacity in frames.
    pub frame_queue_capacity: usize,
    pub vad_threshold: f32,
    pub endpointer: EndpointerConfig,
    /// Sustained speech during playback that counts as barge-in.
    pub barge_in_ms: u32,
    pub orchestrator: OrchestratorConfig,
    /// Spoken once at startup when speech output is enabled.
    pub greeting: Option<String>,
    /// Buffer between classifier and listener.
    pub classified_buffer: usize,
    /// Buffer between listener and orchestrator.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            frame_queue_capacity: defaults::FRAME_QUEUE_CAPACITY,
            vad_threshold: defaults::VAD_THRESHOLD,
            endpointer: EndpointerConfig::default(),
            barge_in_ms: defaults::BARGE_IN_MS,
            orchestrator: OrchestratorConfig::default(),
            greeting: None,
            classified_buffer: defaults::FRAME_QUEUE_CAPACITY,
            event_buffer: 16,
        }
    }
}

impl EngineConfig {
    pub fn barge_in_frames(&self) -> usize {
        defaults::frames_for_ms(self.barge_in_ms, self.format.frame_ms)
    }
}

/// Starts conversations.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Opens the devices and starts every worker.
    ///
    /// `sink` is only opened when `adapters` has a synthesizer; pass `None`
    /// for text-only sessions.
    ///
    /// # Errors
    /// - `UnsupportedFrameFormat` if the classifier rejects the frame format
    /// - `DeviceUnavailable` if the input or output device cannot be opened
    pub fn start(
        self,
        session: Session,
        source: Box<dyn AudioSource>,
        sink: Option<Box<dyn AudioSink>>,
        adapters: Adapters,
    ) -> Result<EngineHandle> {
        let config = self.config;

        // Validated once here, never per frame.
        let classifier =
            VoiceActivityClassifier::new(EnergyDetector::new(config.vad_threshold), config.format)?;

        let playback = match (sink, adapters.synthesis.is_some()) {
            (Some(sink), true) => Some(PlaybackController::spawn(
                sink,
                config.format.samples_per_frame(),
            )?),
            _ => None,
        };

        let mut frame_source = AudioFrameSource::new(
            source,
            FrameSourceConfig {
                format: config.format,
                queue_capacity: config.frame_queue_capacity,
                ..FrameSourceConfig::default()
            },
        );
        let frames_rx = frame_source.start()?;
        session.gate().open();

        let latch = Arc::new(FatalLatch::new());
        let workers = spawn_workers(
            &config, &session, classifier, adapters, playback, frames_rx, &latch,
        );
        let (classifier_runner, listener_runner, orchestrator_thread) = match workers {
            Ok(workers) => workers,
            Err(e) => {
                // Disconnecting capture winds down whatever did start.
                session.gate().close();
                if let Err(stop) = frame_source.stop() {
                    warn!("failed to stop capture: {stop}");
                }
                return Err(e);
            }
        };

        info!(
            sample_rate = config.format.sample_rate,
            frame_ms = config.format.frame_ms,
            debounce = config.endpointer.debounce_frames,
            hangover = config.endpointer.hangover_frames,
            barge_in_frames = config.barge_in_frames(),
            "conversation started"
        );

        Ok(EngineHandle {
            session,
            frame_source,
            classifier: Some(classifier_runner),
            listener: Some(listener_runner),
            orchestrator: Some(orchestrator_thread),
            latch,
        })
    }
}

type Workers = (
    StationRunner<ClassifierStation<EnergyDetector>>,
    StationRunner<ListenerStation>,
    JoinHandle<()>,
);

fn spawn_workers(
    config: &EngineConfig,
    session: &Session,
    classifier: VoiceActivityClassifier<EnergyDetector>,
    adapters: Adapters,
    playback: Option<PlaybackController>,
    frames_rx: Receiver<AudioFrame>,
    latch: &Arc<FatalLatch>,
) -> Result<Workers> {
    let (classified_tx, classified_rx) = bounded(config.classified_buffer.max(1));
    let (event_tx, event_rx) = bounded(config.event_buffer.max(1));

    let classifier_runner = StationRunner::spawn(
        ClassifierStation::new(classifier),
        frames_rx,
        classified_tx,
        latch.clone(),
    )?;

    let listener = ListenerStation::new(
        Endpointer::new(config.endpointer),
        InterruptMonitor::new(config.barge_in_frames()),
        session.gate().clone(),
    );
    let listener_runner = StationRunner::spawn(listener, classified_rx, event_tx, latch.clone())?;

    let mut orchestrator = ConversationOrchestrator::new(
        session.clone(),
        adapters,
        playback,
        config.orchestrator.clone(),
    );
    let greeting = config.greeting.clone();
    let orchestrator_thread = thread::Builder::new()
        .name("orchestrator".to_string())
        .spawn(move || {
            if let Some(greeting) = greeting {
                orchestrator.greet(&greeting);
            }
            orchestrator.run(event_rx);
        })?;

    Ok((classifier_runner, listener_runner, orchestrator_thread))
}

/// A running conversation.
pub struct EngineHandle {
    session: Session,
    frame_source: AudioFrameSource,
    classifier: Option<StationRunner<ClassifierStation<EnergyDetector>>>,
    listener: Option<StationRunner<ListenerStation>>,
    orchestrator: Option<JoinHandle<()>>,
    latch: Arc<FatalLatch>,
}

impl EngineHandle {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The error that ended the session, if a worker hit one.
    pub fn fatal_error(&self) -> Option<String> {
        self.frame_source
            .failure()
            .map(|e| format!("audio capture: {e}"))
            .or_else(|| self.latch.fatal())
    }

    /// True while audio is being captured.
    pub fn is_running(&self) -> bool {
        self.frame_source.is_running()
    }

    /// Frames overwritten in the capture queue so far.
    pub fn dropped_frames(&self) -> u64 {
        self.frame_source.dropped_frames()
    }

    /// Waits until capture ends on its own (finite sources) or `timeout`
    /// passes. Returns true if capture ended.
    pub fn wait_for_capture_end(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.frame_source.is_running() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }

    /// Stops capture and waits for every worker to finish.
    ///
    /// Playback in progress is cancelled and a turn still in flight stops
    /// at its next stage change without playing anything.
    pub fn shutdown(mut self) -> Result<()> {
        self.session.gate().close();
        let discarded = self.frame_source.stop()?;
        if discarded > 0 {
            info!(discarded, "discarded queued frames at shutdown");
        }

        if let Some(runner) = self.classifier.take()
            && let Err(msg) = runner.join()
        {
            warn!("{msg}");
        }
        if let Some(runner) = self.listener.take()
            && let Err(msg) = runner.join()
        {
            warn!("{msg}");
        }
        if let Some(thread) = self.orchestrator.take()
            && thread.join().is_err()
        {
            warn!("orchestrator thread panicked");
        }
        info!(
            turns = self.session.transcript().len(),
            dropped_frames = self.frame_source.dropped_frames(),
            "conversation ended"
        );
        Ok(())
    }
}
