//! CLI entry point for the scope adapters.
//!
//! Exercises both adapters without a host application:
//! - `live`: runs the FastCamera live loop into a logging frame sink
//! - `stage`: runs one operation against a Newport ESP302 stage
//!
//! # Usage
//!
//! ```bash
//! scope-adapters live --frames 20 --interval-ms 50 --width 512 --height 512
//! scope-adapters stage --port /dev/ttyUSB0 move 1250
//! RUST_LOG=debug scope-adapters --config lab.toml stage status
//! ```
//!
//! The optional `--config` file holds `[camera]` and `[stage]` tables;
//! command-line flags override values read from it.

// Global allocator
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scope_core::data::{ChannelView, FrameGeometry};
use scope_core::host::{FrameSink, InsertOutcome};
use scope_core::metadata::FrameMetadata;
use scope_driver_camera::{CameraConfig, FastCamera};
use scope_driver_newport::{Esp302Stage, StageConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "scope-adapters")]
#[command(about = "Simulated camera and ESP302 stage adapters", long_about = None)]
struct Cli {
    /// TOML file with [camera] and [stage] tables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run live acquisition on the simulated camera
    Live {
        /// Frames to acquire; negative runs until Ctrl+C
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        frames: i64,

        /// Minimum time between frames
        #[arg(long, default_value_t = 0.0)]
        interval_ms: f64,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        #[arg(long)]
        channels: Option<u32>,

        #[arg(long)]
        exposure_ms: Option<f64>,
    },

    /// Run one operation on a Newport ESP302 stage
    Stage {
        /// Serial port (e.g. /dev/ttyUSB0, COM3)
        #[arg(long)]
        port: Option<String>,

        /// Controller bus address (1-31)
        #[arg(long)]
        address: Option<u8>,

        #[command(subcommand)]
        action: StageAction,
    },
}

#[derive(Subcommand, Debug)]
enum StageAction {
    /// Print the current position in micrometers
    Position,
    /// Absolute move in micrometers, then wait until ready
    Move {
        #[arg(allow_negative_numbers = true)]
        um: f64,
    },
    /// Relative move in micrometers (not limit-checked), then wait until ready
    MoveRel {
        #[arg(allow_negative_numbers = true)]
        um: f64,
    },
    /// Search for the origin
    Home,
    /// Print busy state and controller error status
    Status,
    /// Print the velocity, or set it when a value is given
    Velocity { value: Option<f64> },
}

/// Tables read from `--config`.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    camera: Option<toml::Value>,
    stage: Option<toml::Value>,
}

impl FileConfig {
    fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    fn camera(&self) -> Result<CameraConfig> {
        match &self.camera {
            Some(table) => CameraConfig::from_toml(table.clone()),
            None => Ok(CameraConfig::default()),
        }
    }

    fn stage(&self) -> Result<StageConfig> {
        match &self.stage {
            Some(table) => StageConfig::from_toml(table.clone()),
            None => Ok(StageConfig::default()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Live {
            frames,
            interval_ms,
            width,
            height,
            channels,
            exposure_ms,
        } => {
            let mut config = file.camera()?;
            config.width = width.unwrap_or(config.width);
            config.height = height.unwrap_or(config.height);
            config.channels = channels.unwrap_or(config.channels);
            config.exposure_ms = exposure_ms.unwrap_or(config.exposure_ms);
            config.validate()?;
            run_live(config, frames, interval_ms).await
        }
        Commands::Stage {
            port,
            address,
            action,
        } => {
            let mut config = file.stage()?;
            if let Some(port) = port {
                config.port = port;
            }
            config.address = address.unwrap_or(config.address);
            config.validate()?;
            run_stage(config, action).await
        }
    }
}

// =============================================================================
// Camera
// =============================================================================

/// Frame sink that logs every image and accepts it.
#[derive(Debug, Default)]
struct LoggingSink {
    images: AtomicU64,
}

impl FrameSink for LoggingSink {
    fn prepare_for_acquisition(&self, geometry: FrameGeometry) -> std::result::Result<(), String> {
        tracing::info!(
            width = geometry.width,
            height = geometry.height,
            channels = geometry.channels,
            bytes = geometry.size().map(|s| s.bytes).unwrap_or_default(),
            "Preparing for acquisition"
        );
        Ok(())
    }

    fn insert_image(&self, image: &ChannelView<'_>, metadata: &FrameMetadata) -> InsertOutcome {
        self.images.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            channel = image.channel,
            bytes = image.pixels.len(),
            metadata = %metadata.to_json(),
            "Image inserted"
        );
        InsertOutcome::Inserted
    }

    fn clear_buffer(&self) {
        tracing::warn!("Sink buffer cleared");
    }

    fn acquisition_finished(&self) {
        tracing::info!(
            images = self.images.load(Ordering::Relaxed),
            "Acquisition finished"
        );
    }
}

async fn run_live(config: CameraConfig, frames: i64, interval_ms: f64) -> Result<()> {
    let mut camera = FastCamera::with_config(config)?;
    camera.initialize()?;

    let sink = Arc::new(LoggingSink::default());
    camera
        .start_sequence_acquisition(frames, interval_ms, sink)
        .await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while camera.is_capturing() {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for Ctrl+C")?;
                tracing::info!("Stop requested");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
    }

    camera.stop_sequence_acquisition().await?;
    let frames_acquired = camera.frames_acquired();
    let outcome = camera.last_outcome();
    camera.shutdown().await?;

    println!("Frames acquired: {}", frames_acquired);
    match outcome {
        Some(end) if end.is_failure() => anyhow::bail!("live acquisition failed: {:?}", end),
        Some(end) => println!("Outcome: {:?}", end),
        None => println!("Outcome: none"),
    }
    Ok(())
}

// =============================================================================
// Stage
// =============================================================================

async fn run_stage(config: StageConfig, action: StageAction) -> Result<()> {
    let ready_timeout = config.ready_timeout();
    let mut stage = Esp302Stage::connect(config).await?;
    tracing::debug!(?action, address = stage.address(), "Running stage action");

    match action {
        StageAction::Position => {
            println!("{:.3} um", stage.get_position_um().await?);
        }
        StageAction::Move { um } => {
            stage.set_position_um(um).await?;
            stage.wait_until_ready(ready_timeout).await?;
            println!("{:.3} um", stage.get_position_um().await?);
        }
        StageAction::MoveRel { um } => {
            stage.set_relative_position_um(um).await?;
            stage.wait_until_ready(ready_timeout).await?;
            println!("{:.3} um", stage.get_position_um().await?);
        }
        StageAction::Home => {
            stage.initialize().await?;
            println!("Homed at {:.3} um", stage.get_position_um().await?);
        }
        StageAction::Status => {
            let busy = stage.is_busy().await?;
            let error = stage.get_error().await;
            println!("busy: {}", busy);
            match error {
                Ok(()) => println!("error: none"),
                Err(e) => println!("error: {}", e),
            }
            let (lower, upper) = stage.get_limits();
            println!("limits: [{:.3}, {:.3}] um", lower, upper);
        }
        StageAction::Velocity { value: Some(v) } => {
            stage.set_velocity(v).await?;
            println!("velocity: {}", stage.get_velocity().await?);
        }
        StageAction::Velocity { value: None } => {
            println!("velocity: {}", stage.get_velocity().await?);
        }
    }

    stage.shutdown().await?;
    Ok(())
}
