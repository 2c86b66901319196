//! Environment checks for `parlance check`.
//!
//! Verifies that audio devices exist, that the configured frame format is
//! one the voice activity classifier accepts, that utterance audio has a
//! writable scratch directory and that adapter programs are installed.

use crate::audio::capture::{DeviceKind, list_devices};
use crate::audio::vad::{EnergyDetector, VoiceActivityClassifier};
use crate::audio::wav::ScratchStorage;
use crate::config::Config;
use owo_colors::OwoColorize;
use std::path::Path;

/// Result of a single check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Check passed
    Ok,
    /// Required thing is missing
    NotFound,
    /// Present but with a problem
    Warning(String),
}

impl CheckResult {
    fn is_ok(&self) -> bool {
        matches!(self, CheckResult::Ok)
    }
}

/// Look a program up the way the OS would when spawning it.
pub fn check_program(program: &str) -> CheckResult {
    if program.contains('/') {
        return if Path::new(program).is_file() {
            CheckResult::Ok
        } else {
            CheckResult::NotFound
        };
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return CheckResult::Warning("PATH is not set".to_string());
    };
    if std::env::split_paths(&paths).any(|dir| dir.join(program).is_file()) {
        CheckResult::Ok
    } else {
        CheckResult::NotFound
    }
}

/// Check the configured frame format against the classifier.
pub fn check_frame_format(config: &Config) -> CheckResult {
    match VoiceActivityClassifier::new(
        EnergyDetector::new(config.audio.vad_threshold),
        config.frame_format(),
    ) {
        Ok(_) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

/// Probe the scratch directory (and its fallback) for writability.
pub fn check_scratch_storage(config: &Config) -> CheckResult {
    match ScratchStorage::resolve(
        config.session.scratch_dir.as_deref(),
        config.session.scratch_fallback_dir.as_deref(),
    ) {
        Ok(_) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

fn check_devices(kind: DeviceKind) -> CheckResult {
    match list_devices(kind) {
        Ok(devices) if devices.is_empty() => CheckResult::NotFound,
        Ok(_) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

fn report(label: &str, result: &CheckResult) {
    print!("{:<24}", label);
    match result {
        CheckResult::Ok => println!("{}", "✓ OK".green()),
        CheckResult::NotFound => println!("{}", "✗ NOT FOUND".red()),
        CheckResult::Warning(msg) => {
            println!("{}", "⚠ WARNING".yellow());
            for line in msg.lines() {
                println!("  {}", line);
            }
        }
    }
}

fn report_command(label: &str, argv: &[String], required: bool) -> bool {
    match argv.first() {
        Some(program) => {
            let result = check_program(program);
            report(&format!("{label} ({program})"), &result);
            result.is_ok()
        }
        None if required => {
            report(label, &CheckResult::Warning("not configured".to_string()));
            false
        }
        None => {
            println!("{:<24}{}", label, "- not configured".dimmed());
            true
        }
    }
}

/// Run every check and print the results.
///
/// Returns true when nothing needs attention.
pub fn check_environment(config: &Config) -> bool {
    println!("Checking parlance environment...\n");
    let mut healthy = true;

    let validation = match config.validate() {
        Ok(()) => CheckResult::Ok,
        Err(e) => CheckResult::Warning(e.to_string()),
    };
    report("Configuration:", &validation);
    healthy &= validation.is_ok();

    let input = check_devices(DeviceKind::Input);
    report("Input devices:", &input);
    healthy &= input.is_ok();

    let output = check_devices(DeviceKind::Output);
    report("Output devices:", &output);
    if !config.session.disable_synthesis {
        healthy &= output.is_ok();
    }

    let format = check_frame_format(config);
    report(
        &format!(
            "Frame format ({} Hz, {} ms):",
            config.audio.sample_rate, config.audio.frame_ms
        ),
        &format,
    );
    healthy &= format.is_ok();

    let scratch = check_scratch_storage(config);
    report("Scratch storage:", &scratch);
    healthy &= scratch.is_ok();

    println!();
    println!("Adapters:");
    match &config.adapters.whisper_model {
        Some(model) => {
            let result = if model.is_file() {
                if cfg!(feature = "whisper") {
                    CheckResult::Ok
                } else {
                    CheckResult::Warning(
                        "built without the `whisper` feature\n\
                         rebuild with: cargo build --release --features whisper"
                            .to_string(),
                    )
                }
            } else {
                CheckResult::NotFound
            };
            report("  transcribe (whisper)", &result);
            healthy &= result.is_ok();
        }
        None => {
            healthy &= report_command("  transcribe", &config.adapters.transcribe_command, true);
        }
    }
    healthy &= report_command("  generate", &config.adapters.generate_command, true);
    if !config.session.disable_synthesis {
        healthy &= report_command("  synthesize", &config.adapters.synthesize_command, false);
    }

    println!();
    if healthy {
        println!("{}", "✓ Ready to talk.".green());
    } else {
        println!(
            "{} Config file: {}",
            "⚠ Some checks need attention.".yellow(),
            Config::default_path().display()
        );
    }
    healthy
}
