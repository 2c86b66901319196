//! Composition root: turns a [`Config`] into a running conversation.
//!
//! Builds the adapters, opens the devices, starts the engine and waits for
//! Ctrl+C, the session timer or a fatal error.

use crate::adapters::whisper::{WhisperConfig, WhisperTranscription};
use crate::adapters::{
    Adapters, CommandGeneration, CommandSpec, CommandSynthesis, CommandTranscription,
    GenerationAdapter, SynthesisAdapter, TranscriptionAdapter,
};
use crate::audio::capture::{CpalAudioSink, CpalAudioSource, suppress_audio_warnings};
use crate::audio::playback::AudioSink;
use crate::audio::source::AudioSource;
use crate::audio::wav::ScratchStorage;
use crate::config::Config;
use crate::document::{DocumentIndex, DocumentLoader};
use crate::engine::Engine;
use crate::error::{ParlanceError, Result};
use crate::logging::init_logging;
use crate::session::{EventSink, Session, SessionEvent};
use anyhow::Context;
use crossbeam_channel::{Receiver, bounded};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// How often the main task checks for a fatal worker error.
const FATAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Stand-in deadline when no session duration is set.
const NO_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Command-line overrides for a conversation.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub document: Option<PathBuf>,
    pub no_tts: bool,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub save_transcript: Option<PathBuf>,
    pub duration: Option<Duration>,
    pub verbosity: u8,
    pub log_file: Option<PathBuf>,
}

impl RunOptions {
    /// Folds the overrides into `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(device) = &self.input_device {
            config.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.audio.output_device = Some(device.clone());
        }
        if self.no_tts {
            config.session.disable_synthesis = true;
        }
        if self.verbosity >= 2 {
            config.session.verbose_diagnostics = true;
        }
    }
}

/// Builds the configured transcription, generation and synthesis adapters.
///
/// Synthesis is left out when it is disabled or no command is configured.
///
/// # Errors
/// - `ConfigInvalidValue` if no recognizer or language model is configured
/// - `ScratchStorageUnavailable` if a command recognizer has nowhere to
///   write utterance audio
pub fn build_adapters(config: &Config) -> Result<Adapters> {
    let adapters = &config.adapters;

    let transcription: Arc<dyn TranscriptionAdapter> = if let Some(model) = &adapters.whisper_model
    {
        Arc::new(WhisperTranscription::new(WhisperConfig {
            model_path: model.clone(),
            language: adapters.language.clone(),
            threads: None,
        })?)
    } else if !adapters.transcribe_command.is_empty() {
        let spec = CommandSpec::new("adapters.transcribe_command", &adapters.transcribe_command)?;
        let scratch = ScratchStorage::resolve(
            config.session.scratch_dir.as_deref(),
            config.session.scratch_fallback_dir.as_deref(),
        )?;
        info!(dir = %scratch.dir().display(), "scratch storage ready");
        Arc::new(CommandTranscription::new(spec, scratch))
    } else {
        return Err(ParlanceError::ConfigInvalidValue {
            key: "adapters.transcribe_command".to_string(),
            message: "set a recognizer command or adapters.whisper_model".to_string(),
        });
    };

    let generation: Arc<dyn GenerationAdapter> = Arc::new(CommandGeneration::new(
        CommandSpec::new("adapters.generate_command", &adapters.generate_command)?,
    ));

    let synthesis: Option<Arc<dyn SynthesisAdapter>> = if config.session.disable_synthesis {
        None
    } else if adapters.synthesize_command.is_empty() {
        warn!("no adapters.synthesize_command configured, replies will be text only");
        None
    } else {
        Some(Arc::new(CommandSynthesis::new(CommandSpec::new(
            "adapters.synthesize_command",
            &adapters.synthesize_command,
        )?)))
    };

    Ok(Adapters {
        transcription,
        generation,
        synthesis,
    })
}

/// One line of console output for a session event.
pub fn describe_event(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::TurnAppended(turn) if turn.is_user() => Some(format!("You: {}", turn.text())),
        SessionEvent::TurnAppended(turn) => Some(format!("Assistant: {}", turn.text())),
        SessionEvent::BargeIn => Some("(interrupted)".to_string()),
        SessionEvent::Notice(message) => Some(message.clone()),
        SessionEvent::StateChanged(_) => None,
    }
}

fn spawn_console(events: Receiver<SessionEvent>) -> Result<thread::JoinHandle<()>> {
    let handle = thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for event in events {
                let Some(line) = describe_event(&event) else {
                    continue;
                };
                match event {
                    SessionEvent::TurnAppended(turn) if turn.is_user() => {
                        eprintln!("{}", line.cyan())
                    }
                    SessionEvent::TurnAppended(_) => eprintln!("{}", line.green()),
                    SessionEvent::Notice(_) => eprintln!("{}", line.yellow()),
                    _ => eprintln!("{}", line.dimmed()),
                }
            }
        })?;
    Ok(handle)
}

/// Runs a conversation until Ctrl+C, the optional duration elapses or a
/// worker fails.
pub async fn run_session(mut config: Config, options: RunOptions) -> anyhow::Result<()> {
    options.apply(&mut config);
    config.validate()?;

    let verbosity = if config.session.verbose_diagnostics {
        options.verbosity.max(2)
    } else {
        options.verbosity
    };
    init_logging(verbosity, options.log_file.as_deref())?;
    info!(version = %crate::version_string(), "parlance starting");

    // Suppress noisy JACK/ALSA warnings before audio init
    suppress_audio_warnings();

    let adapters = build_adapters(&config)?;
    info!(
        transcription = adapters.transcription.name(),
        generation = adapters.generation.name(),
        synthesis = adapters.synthesis.as_ref().map(|s| s.name()).unwrap_or("off"),
        "adapters ready"
    );

    let (event_tx, event_rx) = bounded(64);
    let console = spawn_console(event_rx)?;
    let session = Session::with_document_index(
        EventSink::new(event_tx),
        DocumentIndex::with_max_chunk_chars(config.document.max_chunk_chars),
    );

    if let Some(path) = &options.document {
        let loader = DocumentLoader::new(config.document.max_bytes);
        if let Err(e) = session.upload_document(path, &loader) {
            warn!(path = %path.display(), error = %e, "document not loaded");
            eprintln!("{} {}", "Document not loaded:".yellow(), e);
        }
    }

    let source: Box<dyn AudioSource> = Box::new(CpalAudioSource::new(
        config.audio.input_device.as_deref(),
        config.audio.sample_rate,
    )?);
    let sink: Option<Box<dyn AudioSink>> = match adapters.synthesis {
        Some(_) => Some(Box::new(CpalAudioSink::new(
            config.audio.output_device.as_deref(),
            config.audio.sample_rate,
            config.audio.frame_ms,
        )?)),
        None => None,
    };

    let handle = Engine::new(config.engine_config()).start(session.clone(), source, sink, adapters)?;
    eprintln!("{}", "Listening. Press Ctrl+C to end the session.".dimmed());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = tokio::time::sleep(options.duration.unwrap_or(NO_DEADLINE));
    tokio::pin!(deadline);
    let mut poll = tokio::time::interval(FATAL_POLL_INTERVAL);

    let fatal = loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("Failed to wait for Ctrl+C")?;
                eprintln!("\nEnding session...");
                break None;
            }
            _ = &mut deadline, if options.duration.is_some() => {
                info!("session duration reached");
                break None;
            }
            _ = poll.tick() => {
                if let Some(error) = handle.fatal_error() {
                    break Some(error);
                }
            }
        }
    };

    handle.shutdown()?;

    if let Some(path) = &options.save_transcript {
        save_transcript(&session, path)?;
        eprintln!("Transcript saved to {}", path.display());
    }

    drop(session);
    if console.join().is_err() {
        warn!("console thread panicked");
    }

    match fatal {
        Some(error) => Err(anyhow::anyhow!(error)),
        None => Ok(()),
    }
}

/// Writes the session transcript as pretty JSON.
pub fn save_transcript(session: &Session, path: &Path) -> anyhow::Result<()> {
    let json = session.transcript().to_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write transcript to {}", path.display()))?;
    Ok(())
}

/// Prints a document's summary and study questions.
pub fn run_summary(config: &Config, path: &Path, questions: usize) -> anyhow::Result<()> {
    let loaded = DocumentLoader::new(config.document.max_bytes)
        .load(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    let index = DocumentIndex::with_max_chunk_chars(config.document.max_chunk_chars);
    index.ingest(&loaded.name, &loaded.text)?;

    if let Some(summary) = index.summary() {
        println!("{}", summary);
    }

    let questions = index.study_questions(questions);
    if questions.is_empty() {
        println!("\n{}", "No titled sections to ask about.".dimmed());
        return Ok(());
    }
    println!("\n{}", "Study questions:".green());
    for (i, q) in questions.iter().enumerate() {
        println!("  {}. {}", i + 1, q.question);
        println!("     {} {}", "Answer:".dimmed(), q.answer);
    }
    Ok(())
}
