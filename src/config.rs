use crate::audio::vad::FrameFormat;
use crate::defaults;
use crate::engine::EngineConfig;
use crate::error::{ParlanceError, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::pipeline::endpointer::EndpointerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub endpoint: EndpointConfig,
    pub adapters: AdapterConfig,
    pub document: DocumentConfig,
    pub session: SessionConfig,
}

/// Audio devices and frame format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    /// Must be 16000.
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub frame_queue_capacity: usize,
    pub vad_threshold: f32,
}

/// Endpointing and barge-in timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointConfig {
    /// Consecutive speech frames before an utterance starts (N).
    pub debounce_frames: usize,
    /// Consecutive silence frames before an utterance ends (M).
    pub hangover_frames: usize,
    pub barge_in_ms: u32,
    /// 0 disables the limit.
    pub max_utterance_ms: u32,
}

/// Speech-to-text, language model and text-to-speech providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AdapterConfig {
    pub timeout_ms: u64,
    pub min_confidence: f32,
    pub history_turns: usize,
    /// Recognizer command; `{input}` is replaced by the WAV path.
    pub transcribe_command: Vec<String>,
    /// Reads the prompt on stdin, writes the reply to stdout.
    pub generate_command: Vec<String>,
    /// Reads text on stdin, writes WAV to stdout.
    pub synthesize_command: Vec<String>,
    /// Used instead of `transcribe_command` in builds with the `whisper` feature.
    pub whisper_model: Option<PathBuf>,
    pub language: Option<String>,
}

/// Document ingestion and retrieval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DocumentConfig {
    pub max_bytes: u64,
    pub max_chunk_chars: usize,
    pub top_k: usize,
}

/// Session toggles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub disable_synthesis: bool,
    pub verbose_diagnostics: bool,
    pub scratch_dir: Option<PathBuf>,
    pub scratch_fallback_dir: Option<PathBuf>,
    /// Empty disables the greeting.
    pub greeting: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            frame_queue_capacity: defaults::FRAME_QUEUE_CAPACITY,
            vad_threshold: defaults::VAD_THRESHOLD,
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            debounce_frames: defaults::DEBOUNCE_FRAMES,
            hangover_frames: defaults::HANGOVER_FRAMES,
            barge_in_ms: defaults::BARGE_IN_MS,
            max_utterance_ms: defaults::MAX_UTTERANCE_MS,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::ADAPTER_TIMEOUT.as_millis() as u64,
            min_confidence: defaults::MIN_CONFIDENCE,
            history_turns: defaults::HISTORY_TURNS,
            transcribe_command: Vec::new(),
            generate_command: Vec::new(),
            synthesize_command: Vec::new(),
            whisper_model: None,
            language: None,
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            max_bytes: defaults::MAX_DOCUMENT_BYTES,
            max_chunk_chars: defaults::MAX_CHUNK_CHARS,
            top_k: defaults::RETRIEVAL_TOP_K,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disable_synthesis: false,
            verbose_diagnostics: false,
            scratch_dir: None,
            scratch_fallback_dir: None,
            greeting: defaults::GREETING.to_string(),
        }
    }
}

fn invalid(key: &str, message: impl Into<String>) -> ParlanceError {
    ParlanceError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents).map_err(ParlanceError::from)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is an error.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                Ok(Self::default())
            }
            Err(e) => Err(e.context(format!("Failed to load config from {}", path.display()))),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - PARLANCE_INPUT_DEVICE → audio.input_device
    /// - PARLANCE_OUTPUT_DEVICE → audio.output_device
    /// - PARLANCE_SCRATCH_DIR → session.scratch_dir
    /// - PARLANCE_DISABLE_SYNTHESIS → session.disable_synthesis (1/true/yes/on)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(device) = std::env::var("PARLANCE_INPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        if let Ok(device) = std::env::var("PARLANCE_OUTPUT_DEVICE")
            && !device.is_empty()
        {
            self.audio.output_device = Some(device);
        }

        if let Ok(dir) = std::env::var("PARLANCE_SCRATCH_DIR")
            && !dir.is_empty()
        {
            self.session.scratch_dir = Some(PathBuf::from(dir));
        }

        if let Ok(value) = std::env::var("PARLANCE_DISABLE_SYNTHESIS")
            && !value.is_empty()
        {
            self.session.disable_synthesis = truthy(&value);
        }

        self
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/parlance/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parlance")
            .join("config.toml")
    }

    /// Rejects values that would make the pipeline misbehave.
    ///
    /// The sample rate is fixed at 16kHz end to end. Frame duration is
    /// checked by the voice activity classifier at startup, not here.
    pub fn validate(&self) -> Result<()> {
        if self.audio.sample_rate != defaults::SAMPLE_RATE {
            return Err(invalid(
                "audio.sample_rate",
                format!("the pipeline runs at {} Hz only", defaults::SAMPLE_RATE),
            ));
        }
        if !(self.audio.vad_threshold > 0.0 && self.audio.vad_threshold <= 1.0) {
            return Err(invalid("audio.vad_threshold", "must be in (0.0, 1.0]"));
        }
        if self.audio.frame_queue_capacity == 0 {
            return Err(invalid("audio.frame_queue_capacity", "must be at least 1"));
        }
        if self.endpoint.debounce_frames == 0 {
            return Err(invalid("endpoint.debounce_frames", "must be at least 1"));
        }
        if self.endpoint.hangover_frames == 0 {
            return Err(invalid("endpoint.hangover_frames", "must be at least 1"));
        }
        if self.endpoint.max_utterance_ms > 0
            && defaults::frames_for_ms(self.endpoint.max_utterance_ms, self.audio.frame_ms)
                <= self.endpoint.debounce_frames
        {
            return Err(invalid(
                "endpoint.max_utterance_ms",
                "must be longer than the debounce run (or 0 for no limit)",
            ));
        }
        if self.endpoint.barge_in_ms == 0 {
            return Err(invalid("endpoint.barge_in_ms", "must be greater than 0"));
        }
        if self.adapters.timeout_ms == 0 {
            return Err(invalid("adapters.timeout_ms", "must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.adapters.min_confidence) {
            return Err(invalid("adapters.min_confidence", "must be in [0.0, 1.0]"));
        }
        if self.document.max_bytes == 0 {
            return Err(invalid("document.max_bytes", "must be greater than 0"));
        }
        if self.document.max_chunk_chars == 0 {
            return Err(invalid("document.max_chunk_chars", "must be at least 1"));
        }
        if self.document.top_k == 0 {
            return Err(invalid("document.top_k", "must be at least 1"));
        }
        Ok(())
    }

    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::new(self.audio.sample_rate, self.audio.frame_ms)
    }

    /// Engine settings derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let max_utterance_frames = (self.endpoint.max_utterance_ms > 0).then(|| {
            defaults::frames_for_ms(self.endpoint.max_utterance_ms, self.audio.frame_ms)
        });
        let greeting = self.session.greeting.trim();
        let greeting = (!self.session.disable_synthesis && !greeting.is_empty())
            .then(|| greeting.to_string());

        EngineConfig {
            format: self.frame_format(),
            frame_queue_capacity: self.audio.frame_queue_capacity,
            vad_threshold: self.audio.vad_threshold,
            endpointer: EndpointerConfig {
                debounce_frames: self.endpoint.debounce_frames,
                hangover_frames: self.endpoint.hangover_frames,
                max_utterance_frames,
            },
            barge_in_ms: self.endpoint.barge_in_ms,
            orchestrator: OrchestratorConfig {
                adapter_timeout: Duration::from_millis(self.adapters.timeout_ms),
                min_confidence: self.adapters.min_confidence,
                history_turns: self.adapters.history_turns,
                top_k: self.document.top_k,
                frame_ms: self.audio.frame_ms,
            },
            greeting,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_parlance_env() {
        remove_env("PARLANCE_INPUT_DEVICE");
        remove_env("PARLANCE_OUTPUT_DEVICE");
        remove_env("PARLANCE_SCRATCH_DIR");
        remove_env("PARLANCE_DISABLE_SYNTHESIS");
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(content.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.frame_ms, 30);
        assert_eq!(config.audio.vad_threshold, 0.02);

        assert_eq!(config.endpoint.debounce_frames, 10);
        assert_eq!(config.endpoint.hangover_frames, 25);
        assert_eq!(config.endpoint.barge_in_ms, 240);

        assert_eq!(config.adapters.timeout_ms, 30_000);
        assert!(config.adapters.generate_command.is_empty());

        assert_eq!(config.document.top_k, 3);
        assert!(!config.session.disable_synthesis);
        assert_eq!(config.session.greeting, defaults::GREETING);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_toml(
            r#"
            [audio]
            input_device = "hw:0,0"
            frame_ms = 20

            [endpoint]
            debounce_frames = 5
            hangover_frames = 40
            barge_in_ms = 200

            [adapters]
            timeout_ms = 5000
            generate_command = ["llama-cli", "-m", "model.gguf"]
            transcribe_command = ["whisper-cli", "-f", "{input}"]

            [document]
            top_k = 5

            [session]
            disable_synthesis = true
            greeting = ""
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.audio.input_device, Some("hw:0,0".to_string()));
        assert_eq!(config.audio.frame_ms, 20);
        assert_eq!(config.endpoint.debounce_frames, 5);
        assert_eq!(config.endpoint.hangover_frames, 40);
        assert_eq!(config.adapters.timeout_ms, 5000);
        assert_eq!(
            config.adapters.generate_command,
            vec!["llama-cli", "-m", "model.gguf"]
        );
        assert_eq!(config.document.top_k, 5);
        assert!(config.session.disable_synthesis);
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_toml(
            r#"
            [endpoint]
            hangover_frames = 30
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.endpoint.hangover_frames, 30);
        assert_eq!(config.endpoint.debounce_frames, 10);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_env_override_devices() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parlance_env();

        set_env("PARLANCE_INPUT_DEVICE", "hw:1,0");
        set_env("PARLANCE_OUTPUT_DEVICE", "pulse");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));
        assert_eq!(config.audio.output_device, Some("pulse".to_string()));

        clear_parlance_env();
    }

    #[test]
    fn test_env_override_scratch_and_synthesis() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parlance_env();

        set_env("PARLANCE_SCRATCH_DIR", "/var/tmp/parlance");
        set_env("PARLANCE_DISABLE_SYNTHESIS", "yes");
        let config = Config::default().with_env_overrides();

        assert_eq!(
            config.session.scratch_dir,
            Some(PathBuf::from("/var/tmp/parlance"))
        );
        assert!(config.session.disable_synthesis);

        clear_parlance_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_parlance_env();

        set_env("PARLANCE_INPUT_DEVICE", "");
        set_env("PARLANCE_DISABLE_SYNTHESIS", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.audio.input_device, None);
        assert!(!config.session.disable_synthesis);

        clear_parlance_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_toml(
            r#"
            [audio
            input_device = "broken
        "#,
        );

        assert!(Config::load(temp_file.path()).is_err());
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("parlance"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_parlance_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let temp_file = write_toml("[endpoint\nhangover_frames = ");
        let err = Config::load_or_default(temp_file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let mut config = Config::default();
        config.endpoint.hangover_frames = 0;
        match config.validate() {
            Err(ParlanceError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "endpoint.hangover_frames")
            }
            other => panic!("unexpected: {other:?}"),
        }

        let mut config = Config::default();
        config.audio.vad_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.adapters.min_confidence = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_pins_sample_rate() {
        for rate in [8000, 32000, 48000] {
            let mut config = Config::default();
            config.audio.sample_rate = rate;
            match config.validate() {
                Err(ParlanceError::ConfigInvalidValue { key, .. }) => {
                    assert_eq!(key, "audio.sample_rate")
                }
                other => panic!("{rate} Hz accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn test_validate_rejects_length_cap_below_debounce() {
        let mut config = Config::default();
        config.endpoint.debounce_frames = 3;
        config.endpoint.max_utterance_ms = 30;
        match config.validate() {
            Err(ParlanceError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "endpoint.max_utterance_ms")
            }
            other => panic!("unexpected: {other:?}"),
        }

        config.endpoint.max_utterance_ms = 0;
        assert!(config.validate().is_ok());
        config.endpoint.max_utterance_ms = 120;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_engine_config_conversion() {
        let mut config = Config::default();
        config.audio.frame_ms = 20;
        config.endpoint.max_utterance_ms = 1000;
        config.adapters.timeout_ms = 1500;

        let engine = config.engine_config();
        assert_eq!(engine.format, FrameFormat::new(16000, 20));
        assert_eq!(engine.endpointer.max_utterance_frames, Some(50));
        assert_eq!(engine.orchestrator.adapter_timeout, Duration::from_millis(1500));
        assert_eq!(engine.orchestrator.frame_ms, 20);
        assert_eq!(engine.barge_in_frames(), 12);
        assert_eq!(engine.greeting.as_deref(), Some(defaults::GREETING));
    }

    #[test]
    fn test_greeting_dropped_without_synthesis() {
        let mut config = Config::default();
        config.session.disable_synthesis = true;
        assert_eq!(config.engine_config().greeting, None);

        let mut config = Config::default();
        config.session.greeting = "  ".to_string();
        assert_eq!(config.engine_config().greeting, None);

        config.endpoint.max_utterance_ms = 0;
        assert_eq!(config.engine_config().endpointer.max_utterance_frames, None);
    }
}
