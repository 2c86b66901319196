//! Command-line interface for parlance
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Spoken study companion with barge-in and document grounding
#[derive(Parser, Debug)]
#[command(
    name = "parlance",
    version,
    about = "Spoken study companion with barge-in and document grounding"
)]
pub struct Cli {
    /// Subcommand to execute (default: start a conversation)
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v: turns, -vv: state transitions, -vvv: every frame)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Full diagnostics, same as -vv
    #[arg(long, global = true)]
    pub debug: bool,

    /// Write JSON logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Document to discuss (.txt, .md)
    #[arg(long, short = 'd', value_name = "PATH")]
    pub document: Option<PathBuf>,

    /// Text-only replies: skip speech synthesis and playback
    #[arg(long)]
    pub no_tts: bool,

    /// Audio input device
    #[arg(long, value_name = "DEVICE")]
    pub input_device: Option<String>,

    /// Audio output device
    #[arg(long, value_name = "DEVICE")]
    pub output_device: Option<String>,

    /// Write the transcript as JSON here when the session ends
    #[arg(long, value_name = "PATH")]
    pub save_transcript: Option<PathBuf>,

    /// End the session after this long. Examples: 90s, 5m, 1h30m
    #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

impl Cli {
    /// Effective verbosity: `--debug` counts as `-vv`.
    pub fn verbosity(&self) -> u8 {
        if self.debug {
            self.verbose.max(2)
        } else {
            self.verbose
        }
    }
}

/// Parse a duration string.
///
/// Supports any duration format accepted by `humantime`, plus bare numbers
/// as seconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List available audio input and output devices
    Devices,

    /// Check audio devices, frame format and scratch storage
    Check,

    /// Summarize a document and suggest study questions
    Summary {
        /// Document to summarize
        path: PathBuf,

        /// Number of study questions
        #[arg(long, short = 'q', default_value = "3")]
        questions: usize,
    },
}
