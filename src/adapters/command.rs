//! Adapters that shell out to external programs.
//!
//! Each provider is configured as an argument vector. The transcriber gets
//! the utterance as a scratch WAV file path (substituted for `{input}`, or
//! appended), the generator gets the rendered prompt on stdin and the
//! synthesizer gets the reply text on stdin and must write WAV to stdout.

use super::{GenerationAdapter, PromptContext, SynthesisAdapter, Transcription, TranscriptionAdapter};
use crate::audio::playback::{AudioClip, CancelToken};
use crate::audio::wav::{ScratchStorage, decode_wav};
use crate::defaults::SAMPLE_RATE;
use crate::error::{ParlanceError, Result};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Placeholder replaced by the input file path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How often a running provider is checked for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Program and arguments of an external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    /// Builds a spec from `[program, args...]`.
    ///
    /// # Errors
    /// `ConfigInvalidValue` if the vector is empty or the program is blank.
    pub fn new(key: &str, argv: &[String]) -> Result<Self> {
        let Some((program, args)) = argv.split_first() else {
            return Err(ParlanceError::ConfigInvalidValue {
                key: key.to_string(),
                message: "command must name a program".to_string(),
            });
        };
        if program.trim().is_empty() {
            return Err(ParlanceError::ConfigInvalidValue {
                key: key.to_string(),
                message: "command must name a program".to_string(),
            });
        }
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn args_with_input(&self, input: &str) -> Vec<String> {
        if self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            self.args
                .iter()
                .map(|a| a.replace(INPUT_PLACEHOLDER, input))
                .collect()
        } else {
            let mut args = self.args.clone();
            args.push(input.to_string());
            args
        }
    }

    /// Runs the program, feeding `stdin`, and returns its stdout.
    ///
    /// The child is polled until it exits; if `cancel` fires first it is
    /// killed and reaped. Errors are plain messages; each adapter wraps
    /// them in its own failure variant.
    fn run(
        &self,
        args: &[String],
        stdin: Option<&[u8]>,
        cancel: &CancelToken,
    ) -> std::result::Result<Vec<u8>, String> {
        debug!(program = %self.program, ?args, "running provider command");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => format!("{} not found in PATH", self.program),
                std::io::ErrorKind::PermissionDenied => {
                    format!("permission denied executing {}: {e}", self.program)
                }
                _ => format!("failed to execute {}: {e}", self.program),
            })?;

        // Pipes are drained on their own threads so a chatty child cannot
        // block on a full pipe while we poll it.
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            let input = input.to_vec();
            thread::spawn(move || {
                let _ = pipe.write_all(&input);
            });
        }
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if cancel.is_cancelled() => {
                    let _ = child.kill();
                    let _ = child.wait();
                    debug!(program = %self.program, "provider command killed");
                    return Err(format!("{} was cancelled", self.program));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(format!("failed to wait for {}: {e}", self.program)),
            }
        };

        let stdout = collect(stdout);
        if !status.success() {
            let stderr = collect(stderr);
            return Err(format!(
                "{} failed with {}: {}",
                self.program,
                status,
                String::from_utf8_lossy(&stderr).trim()
            ));
        }
        Ok(stdout)
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    reader
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default()
}

/// Transcribes by writing the utterance to scratch storage and running a
/// recognizer on the file.
#[derive(Debug)]
pub struct CommandTranscription {
    spec: CommandSpec,
    scratch: Mutex<ScratchStorage>,
}

impl CommandTranscription {
    pub fn new(spec: CommandSpec, scratch: ScratchStorage) -> Self {
        Self {
            spec,
            scratch: Mutex::new(scratch),
        }
    }
}

impl TranscriptionAdapter for CommandTranscription {
    fn transcribe(&self, audio: &[i16]) -> Result<Transcription> {
        self.transcribe_cancellable(audio, &CancelToken::new())
    }

    fn transcribe_cancellable(&self, audio: &[i16], cancel: &CancelToken) -> Result<Transcription> {
        let file = self
            .scratch
            .lock()
            .map_err(|_| ParlanceError::Other("scratch storage lock poisoned".to_string()))?
            .write_wav(audio, SAMPLE_RATE)?;
        let input = file.path().to_string_lossy().into_owned();

        let stdout = self
            .spec
            .run(&self.spec.args_with_input(&input), None, cancel)
            .map_err(|message| ParlanceError::TranscriptionFailed { message })?;
        Ok(Transcription::new(
            String::from_utf8_lossy(&stdout).trim().to_string(),
        ))
    }

    fn name(&self) -> &str {
        self.spec.program()
    }
}

/// Generates replies by piping the rendered prompt through a program.
#[derive(Debug)]
pub struct CommandGeneration {
    spec: CommandSpec,
}

impl CommandGeneration {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl GenerationAdapter for CommandGeneration {
    fn generate(&self, context: &PromptContext) -> Result<String> {
        self.generate_cancellable(context, &CancelToken::new())
    }

    fn generate_cancellable(&self, context: &PromptContext, cancel: &CancelToken) -> Result<String> {
        let prompt = context.render();
        let stdout = self
            .spec
            .run(&self.spec.args, Some(prompt.as_bytes()), cancel)
            .map_err(|message| ParlanceError::GenerationFailed { message })?;
        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }

    fn name(&self) -> &str {
        self.spec.program()
    }
}

/// Synthesizes speech by piping text through a program that writes WAV.
#[derive(Debug)]
pub struct CommandSynthesis {
    spec: CommandSpec,
}

impl CommandSynthesis {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl SynthesisAdapter for CommandSynthesis {
    fn synthesize(&self, text: &str) -> Result<AudioClip> {
        self.synthesize_cancellable(text, &CancelToken::new())
    }

    fn synthesize_cancellable(&self, text: &str, cancel: &CancelToken) -> Result<AudioClip> {
        let stdout = self
            .spec
            .run(&self.spec.args, Some(text.as_bytes()), cancel)
            .map_err(|message| ParlanceError::SynthesisFailed { message })?;
        let samples =
            decode_wav(std::io::Cursor::new(stdout)).map_err(|e| ParlanceError::SynthesisFailed {
                message: format!("{} did not produce WAV audio: {e}", self.spec.program()),
            })?;
        Ok(AudioClip::new(samples, SAMPLE_RATE))
    }

    fn name(&self) -> &str {
        self.spec.program()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::adapters::call_with_timeout;
    use crate::audio::wav::encode_wav;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_spec_rejects_empty_command() {
        assert!(matches!(
            CommandSpec::new("adapters.generate_command", &[]),
            Err(ParlanceError::ConfigInvalidValue { .. })
        ));
        assert!(CommandSpec::new("k", &argv(&["  "])).is_err());
    }

    #[test]
    fn test_input_placeholder_or_appended() {
        let spec = CommandSpec::new("k", &argv(&["stt", "-f", "{input}", "-nt"])).unwrap();
        assert_eq!(spec.args_with_input("/tmp/a.wav"), argv(&["-f", "/tmp/a.wav", "-nt"]));

        let spec = CommandSpec::new("k", &argv(&["stt", "-q"])).unwrap();
        assert_eq!(spec.args_with_input("/tmp/a.wav"), argv(&["-q", "/tmp/a.wav"]));
    }

    #[test]
    fn test_transcription_passes_scratch_wav() {
        let dir = TempDir::new().unwrap();
        let scratch = ScratchStorage::resolve(Some(dir.path()), None).unwrap();
        let adapter =
            CommandTranscription::new(CommandSpec::new("k", &argv(&["echo"])).unwrap(), scratch);

        let result = adapter.transcribe(&[0i16; 1600]).unwrap();
        assert!(result.text.ends_with(".wav"), "got {}", result.text);
        assert!(result.text.starts_with(&dir.path().to_string_lossy().into_owned()));
        assert_eq!(result.confidence, None);
    }

    #[test]
    fn test_generation_pipes_prompt() {
        let adapter = CommandGeneration::new(CommandSpec::new("k", &argv(&["cat"])).unwrap());
        let raw = adapter.generate(&PromptContext::new("hello")).unwrap();
        assert_eq!(raw, "User: hello\nAssistant:");
    }

    #[test]
    fn test_failing_program_is_generation_failure() {
        let adapter = CommandGeneration::new(
            CommandSpec::new("k", &argv(&["sh", "-c", "echo oops >&2; exit 3"])).unwrap(),
        );
        match adapter.generate(&PromptContext::new("hi")) {
            Err(ParlanceError::GenerationFailed { message }) => assert!(message.contains("oops")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_timed_out_generation_kills_the_provider() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("finished");
        let script = format!("sleep 1; touch {}", marker.display());
        let adapter: Arc<dyn GenerationAdapter> = Arc::new(CommandGeneration::new(
            CommandSpec::new("k", &argv(&["sh", "-c", &script])).unwrap(),
        ));

        let started = Instant::now();
        let result = call_with_timeout("generation", Duration::from_millis(100), move |cancel| {
            adapter.generate_cancellable(&PromptContext::new("hi"), cancel)
        });
        assert!(matches!(result, Err(ParlanceError::AdapterTimeout { .. })));
        assert!(started.elapsed() < Duration::from_millis(900));

        thread::sleep(Duration::from_millis(1500));
        assert!(!marker.exists(), "provider kept running after the timeout");
    }

    #[test]
    fn test_cancelled_token_stops_synthesis() {
        let adapter = CommandSynthesis::new(CommandSpec::new("k", &argv(&["sleep", "5"])).unwrap());
        let cancel = CancelToken::new();
        cancel.cancel();
        let started = Instant::now();
        match adapter.synthesize_cancellable("hi", &cancel) {
            Err(ParlanceError::SynthesisFailed { message }) => {
                assert!(message.contains("cancelled"), "{message}")
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_missing_program_is_synthesis_failure() {
        let adapter = CommandSynthesis::new(
            CommandSpec::new("k", &argv(&["parlance-no-such-tts-tool"])).unwrap(),
        );
        match adapter.synthesize("hi") {
            Err(ParlanceError::SynthesisFailed { message }) => {
                assert!(message.contains("not found"))
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_synthesis_decodes_wav_stdout() {
        let dir = TempDir::new().unwrap();
        let wav = dir.path().join("reply.wav");
        std::fs::write(&wav, encode_wav(&[1000i16; 8000], 8000).unwrap()).unwrap();

        let adapter = CommandSynthesis::new(
            CommandSpec::new("k", &argv(&["cat", &wav.to_string_lossy()])).unwrap(),
        );
        let clip = adapter.synthesize("ignored").unwrap();
        assert_eq!(clip.sample_rate, SAMPLE_RATE);
        // One second at 8kHz is resampled to one second at 16kHz.
        assert_eq!(clip.duration_ms(), 1000);
    }

    #[test]
    fn test_synthesis_rejects_non_wav_output() {
        let adapter = CommandSynthesis::new(CommandSpec::new("k", &argv(&["cat"])).unwrap());
        assert!(matches!(
            adapter.synthesize("plain text"),
            Err(ParlanceError::SynthesisFailed { .. })
        ));
    }
}
