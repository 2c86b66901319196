use anyhow::Result;
use clap::Parser;
use owo_colors::OwoColorize;
use parlance::app::{RunOptions, run_session, run_summary};
use parlance::audio::capture::{DeviceKind, list_devices};
use parlance::cli::{Cli, Commands};
use parlance::config::Config;
use parlance::diagnostics::check_environment;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbosity = cli.verbosity();

    match cli.command {
        None => {
            let config = load_config(cli.config.as_deref())?;
            let options = RunOptions {
                document: cli.document,
                no_tts: cli.no_tts,
                input_device: cli.input_device,
                output_device: cli.output_device,
                save_transcript: cli.save_transcript,
                duration: cli.duration,
                verbosity,
                log_file: cli.log_file,
            };
            run_session(config, options).await?;
        }
        Some(Commands::Devices) => {
            list_audio_devices()?;
        }
        Some(Commands::Check) => {
            let config = load_config(cli.config.as_deref())?;
            if !check_environment(&config) {
                std::process::exit(1);
            }
        }
        Some(Commands::Summary { path, questions }) => {
            let config = load_config(cli.config.as_deref())?;
            run_summary(&config, &path, questions)?;
        }
    }

    Ok(())
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        Config::load_or_default(&Config::default_path())?
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

/// List available audio input and output devices.
fn list_audio_devices() -> Result<()> {
    let inputs = list_devices(DeviceKind::Input)?;
    let outputs = list_devices(DeviceKind::Output)?;

    if inputs.is_empty() && outputs.is_empty() {
        eprintln!("No audio devices found");
        std::process::exit(1);
    }

    println!("{}", "Input devices:".green());
    for (idx, device) in inputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }
    println!("{}", "Output devices:".green());
    for (idx, device) in outputs.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}
