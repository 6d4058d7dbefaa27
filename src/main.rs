//! Object Showcase - object detection, confirmation and zero-shot categorisation
//!
//! Replays a detection script frame by frame, confirms the prominent object
//! on a reticle (or lets one be selected in multi-object mode) and classifies
//! it once per tracking ID by embedding search.

mod app;
mod capture;
mod classification;
mod config;
mod confirmation;
mod detection;
mod geometry;
mod processor;
mod selection;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::{SelectionPlan, ShowcaseApp};
use crate::capture::{CaptureConfig, StillFrameSource};
use crate::config::{AppConfig, ModeKind};
use crate::detection::ScriptedDetector;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Prominent,
    Multi,
}

/// Object Showcase - detection replay with confirmation and classification
#[derive(Parser, Debug)]
#[command(name = "object-showcase")]
#[command(about = "Confirm and categorise tracked objects from a detection script")]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Detection script: JSON list of frames
    #[arg(long, required_unless_present = "write_default_config")]
    frames: Option<PathBuf>,

    /// Still image used as every frame's pixels
    #[arg(long)]
    image: Option<PathBuf>,

    /// Override the configured detector mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Multi mode: tracking ID to select
    #[arg(long, requires = "select_at")]
    select: Option<i32>,

    /// Multi mode: frame index at which to select
    #[arg(long, requires = "select")]
    select_at: Option<u64>,

    /// Multi mode: frame index at which to clear the selection
    #[arg(long, requires = "select")]
    clear_at: Option<u64>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// Write the default config to this file and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = &args.write_default_config {
        config::save_config(&AppConfig::default(), path)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        println!("Default configuration written to {}", path.display());
        return Ok(());
    }

    info!("Object Showcase starting...");

    let mut config = load_or_create_config(args.config.as_deref());
    if let Some(mode) = args.mode {
        config.detector.mode = match mode {
            ModeArg::Prominent => ModeKind::Prominent,
            ModeArg::Multi => ModeKind::Multi,
        };
    }

    let Some(script_path) = args.frames.as_deref() else {
        anyhow::bail!("--frames is required");
    };
    let mut detector = ScriptedDetector::from_file(script_path)?;
    let frame_count = detector.frame_count();

    let capture_config = CaptureConfig::default();
    let frames = match &args.image {
        Some(path) => StillFrameSource::from_image(path, frame_count)?,
        None => StillFrameSource::blank(&capture_config, frame_count),
    };

    let models_dir = storage::get_models_dir()?;
    let mut app = ShowcaseApp::new(&config, &models_dir)?;

    let selection = args
        .select
        .zip(args.select_at)
        .map(|(tracking_id, at_frame)| SelectionPlan {
            tracking_id,
            at_frame,
            clear_at: args.clear_at,
        });

    let summary = app.run(frames, &mut detector, selection);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Object Showcase shutdown complete");

    Ok(())
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: Option<&Path>) -> AppConfig {
    let config_path = match path {
        Some(path) => Some(path.to_path_buf()),
        None => storage::default_config_path().ok(),
    };

    if let Some(config_path) = config_path {
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring unreadable config {:?}: {:#}", config_path, e),
            }
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}
