//! Full conversations over fake devices: capture → endpointing →
//! transcription → generation → playback.

use crossbeam_channel::{Sender, unbounded};
use parlance::adapters::{Adapters, MockGeneration, MockSynthesis, MockTranscription};
use parlance::audio::playback::MemorySink;
use parlance::audio::source::{ChannelAudioSource, ScriptedAudioSource};
use parlance::document::DocumentLoader;
use parlance::engine::{Engine, EngineConfig};
use parlance::session::{AudioState, ConversationState, Session};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const FRAME_SAMPLES: usize = 480;

fn speech_block() -> Vec<i16> {
    (0..FRAME_SAMPLES)
        .map(|i| if i % 2 == 0 { 8000 } else { -8000 })
        .collect()
}

fn silence_block() -> Vec<i16> {
    vec![0; FRAME_SAMPLES]
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Scripted capture never waits for the pipeline, so the queues must hold
/// the whole script.
fn roomy_config() -> EngineConfig {
    EngineConfig {
        frame_queue_capacity: 1024,
        classified_buffer: 1024,
        ..EngineConfig::default()
    }
}

#[test]
fn test_spoken_question_produces_one_exchange() {
    // 2 s of speech then 1 s of silence at 30 ms frames
    let mut blocks: Vec<Vec<i16>> = (0..67).map(|_| speech_block()).collect();
    blocks.extend((0..34).map(|_| silence_block()));

    let transcription = Arc::new(MockTranscription::new("what is osmosis"));
    let generation = Arc::new(MockGeneration::new(
        "Osmosis is water moving across a membrane.",
    ));
    let adapters = Adapters {
        transcription: transcription.clone(),
        generation: generation.clone(),
        synthesis: None,
    };

    let session = Session::default();
    let handle = Engine::new(roomy_config())
        .start(
            session.clone(),
            Box::new(ScriptedAudioSource::new(blocks)),
            None,
            adapters,
        )
        .unwrap();

    assert!(handle.wait_for_capture_end(Duration::from_secs(5)));
    assert!(wait_for(Duration::from_secs(5), || session.transcript().len() == 2));
    handle.shutdown().unwrap();

    assert_eq!(transcription.call_count(), 1);
    let turns = session.transcript().snapshot();
    assert_eq!(turns.len(), 2);
    assert!(turns[0].is_user());
    assert_eq!(turns[0].text(), "what is osmosis");
    assert_eq!(turns[1].text(), "Osmosis is water moving across a membrane.");
    assert!(turns[1].audio().is_none());
    assert_eq!(session.state(), ConversationState::Listening);
}

#[test]
fn test_uploaded_document_grounds_the_answer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("biology.md");
    std::fs::write(
        &path,
        "# Osmosis\nOsmosis moves water through a semipermeable membrane.\n\n\
         # Mitosis\nMitosis splits one nucleus into two identical nuclei.\n",
    )
    .unwrap();

    let mut blocks: Vec<Vec<i16>> = (0..40).map(|_| speech_block()).collect();
    blocks.extend((0..34).map(|_| silence_block()));

    let generation = Arc::new(MockGeneration::new("Water follows the solute."));
    let adapters = Adapters {
        transcription: Arc::new(MockTranscription::new("explain osmosis and water")),
        generation: generation.clone(),
        synthesis: None,
    };

    let session = Session::default();
    session
        .upload_document(&path, &DocumentLoader::default())
        .unwrap();
    let handle = Engine::new(roomy_config())
        .start(
            session.clone(),
            Box::new(ScriptedAudioSource::new(blocks)),
            None,
            adapters,
        )
        .unwrap();

    assert!(wait_for(Duration::from_secs(5), || session.transcript().len() == 2));
    handle.shutdown().unwrap();

    let prompts = generation.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("semipermeable membrane"), "{}", prompts[0]);
    assert!(!prompts[0].contains("identical nuclei"), "{}", prompts[0]);
    assert!(prompts[0].ends_with("User: explain osmosis and water\nAssistant:"));
}

/// Feeds 30 ms blocks in real time; `speaking` picks speech or silence.
fn spawn_microphone(
    tx: Sender<Vec<i16>>,
    speaking: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            let block = if speaking.load(Ordering::SeqCst) {
                speech_block()
            } else {
                silence_block()
            };
            if tx.send(block).is_err() {
                return;
            }
            thread::sleep(Duration::from_millis(30));
        }
    })
}

#[test]
fn test_barge_in_stops_playback_quickly() {
    let (tx, rx) = unbounded();
    let speaking = Arc::new(AtomicBool::new(false));
    let stop = Arc::new(AtomicBool::new(false));

    let sink = MemorySink::new().paced(Duration::from_millis(30));
    let synthesis = Arc::new(MockSynthesis::new(5000));
    let adapters = Adapters {
        transcription: Arc::new(MockTranscription::new("tell me about cells")),
        generation: Arc::new(MockGeneration::new("Cells are the units of life.")),
        synthesis: Some(synthesis.clone()),
    };

    let session = Session::default();
    let handle = Engine::new(EngineConfig::default())
        .start(
            session.clone(),
            Box::new(ChannelAudioSource::new(rx)),
            Some(Box::new(sink.clone())),
            adapters,
        )
        .unwrap();
    let microphone = spawn_microphone(tx, speaking.clone(), stop.clone());

    // Ask a question: 600 ms of speech, then silence.
    speaking.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(600));
    speaking.store(false, Ordering::SeqCst);

    assert!(
        wait_for(Duration::from_secs(5), || session.state()
            == ConversationState::Speaking),
        "assistant never started speaking"
    );
    thread::sleep(Duration::from_millis(1000));

    // Talk over the reply one second in.
    speaking.store(true, Ordering::SeqCst);
    let interrupted_at = Instant::now();
    assert!(
        wait_for(Duration::from_secs(2), || session.state()
            != ConversationState::Speaking),
        "playback was not interrupted"
    );
    let reaction = interrupted_at.elapsed();
    assert_eq!(session.state(), ConversationState::Listening);

    stop.store(true, Ordering::SeqCst);
    microphone.join().unwrap();
    handle.shutdown().unwrap();

    assert!(reaction < Duration::from_secs(2), "took {reaction:?}");
    assert_eq!(synthesis.call_count(), 1);
    assert!(sink.frames_written() < 100, "wrote {}", sink.frames_written());

    let turns = session.transcript().snapshot();
    assert!(turns.len() >= 2);
    assert_eq!(turns[1].text(), "Cells are the units of life.");
    match turns[1].audio().map(|a| a.state()) {
        Some(AudioState::Truncated {
            played_ms,
            duration_ms,
        }) => {
            assert_eq!(duration_ms, 5000);
            assert!(played_ms < 2000, "played {played_ms} ms");
        }
        other => panic!("unexpected audio state {other:?}"),
    }
}
