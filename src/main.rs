//! CLI entry point for hscam
//!
//! Connects to the camera, pushes the startup configuration and runs one
//! intent:
//!
//! ```bash
//! hscam show
//! hscam set exposure 2000
//! hscam record --seconds 2.5
//! hscam trigger --frames-after 200 --start 100
//! hscam load-settings camera.json
//! hscam save-settings camera.json
//! ```
//!
//! The transport, sensor and recording options come from
//! `config/hscam.toml` (or `--config`) and `HSCAM_*` environment variables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hscam::config::{ControllerConfig, Transport};
use hscam::drain::{DrainReport, FrameRange};
use hscam::events::ControllerEvent;
use hscam::{logging, Controller};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hscam")]
#[command(about = "High-speed camera acquisition controller", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = ControllerConfig::DEFAULT_PATH)]
    config: PathBuf,

    /// Use the simulated camera and grabber regardless of the configuration
    #[arg(long)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the committed camera settings
    Show,

    /// Set one parameter, e.g. `set framerate 500`
    Set {
        /// Parameter name as used in settings files
        name: String,
        value: f64,
    },

    /// Record a video of the given length
    Record {
        #[arg(long, default_value = "1.0")]
        seconds: f64,
    },

    /// Keep capturing for `--frames-after` frames, stop, and save a range of
    /// the ring buffer
    Trigger {
        /// Frames to capture after the trigger; the configured count when omitted
        #[arg(long)]
        frames_after: Option<u64>,
        /// First logical frame index to save
        #[arg(long)]
        start: Option<u64>,
        /// Logical frame index to stop before
        #[arg(long)]
        stop: Option<u64>,
    },

    /// Load and apply a settings file (JSON or legacy text)
    LoadSettings { path: PathBuf },

    /// Save the committed settings
    SaveSettings { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ControllerConfig::load_from(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if cli.simulate {
        config.channel.transport = Transport::Simulated;
    }
    config.validate()?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let mut controller = Controller::open(config).await?;
    let adjustments = controller.connect().await?;
    for adjustment in adjustments {
        println!(
            "⚠️  {} adjusted from {} to {}",
            adjustment.parameter, adjustment.requested, adjustment.applied
        );
    }

    let result = run(&mut controller, cli.command).await;
    controller.shutdown().await?;
    result
}

async fn run(controller: &mut Controller, command: Commands) -> Result<()> {
    match command {
        Commands::Show => {
            let json = serde_json::to_string_pretty(controller.settings())?;
            println!("{json}");
        }
        Commands::Set { name, value } => {
            let outcome = controller.set_parameter(&name, value).await?;
            println!("✅ {} = {}", outcome.parameter, outcome.applied);
            for adjustment in &outcome.adjustments {
                println!(
                    "   {} adjusted from {} to {}",
                    adjustment.parameter, adjustment.requested, adjustment.applied
                );
            }
        }
        Commands::Record { seconds } => {
            let mut events = controller.subscribe();
            let task = controller.start_recording(seconds).await?;
            println!("🎬 Recording {} frames", task.plan().frames);

            let printer = tokio::spawn(async move {
                while let Ok(event) = events.recv().await {
                    match event {
                        ControllerEvent::Countdown { remaining_secs } => {
                            println!("   {remaining_secs}s remaining")
                        }
                        ControllerEvent::RecordingFinished { .. } => break,
                        _ => {}
                    }
                }
            });

            let report = task.wait().await?;
            printer.abort();
            print_report(&report);
        }
        Commands::Trigger {
            frames_after,
            start,
            stop,
        } => {
            let held = controller.trigger(frames_after).await?;
            println!("⏹️  Holding frames {}..{}", held.start, held.end);
            let report = controller
                .save_capture(FrameRange::new(start, stop))
                .await?;
            print_report(&report);
        }
        Commands::LoadSettings { path } => {
            let adjustments = controller.load_settings(&path).await?;
            println!(
                "✅ Applied {} ({} adjusted)",
                path.display(),
                adjustments.len()
            );
        }
        Commands::SaveSettings { path } => {
            controller.save_settings(&path)?;
            println!("✅ Saved {}", path.display());
        }
    }
    Ok(())
}

fn print_report(report: &DrainReport) {
    match &report.location {
        Some(path) => println!(
            "✅ Wrote {} frames to {}",
            report.frames_written,
            path.display()
        ),
        None => println!("✅ Wrote {} frames", report.frames_written),
    }
}
