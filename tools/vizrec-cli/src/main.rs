//! vizrec CLI — Record a layered visualizer stage to a video file.
//!
//! Usage:
//!   vizrec record [OPTIONS]    Record the demo stage until Ctrl+C or the duration limit
//!   vizrec presets [--json]    List render presets
//!   vizrec check               Check encoder and font availability

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod demo;

#[derive(Parser)]
#[command(
    name = "vizrec",
    about = "Record a layered audio visualizer into a shareable video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record the synthetic visualizer stage
    Record {
        /// Preset id (see `vizrec presets`)
        #[arg(short, long)]
        preset: Option<String>,

        /// Maximum duration in milliseconds (at least 1000)
        #[arg(short, long)]
        duration_ms: Option<u64>,

        /// Frame rate override, clamped to 10..=120
        #[arg(long)]
        fps: Option<f64>,

        /// Output file name (sanitized; extension added)
        #[arg(short, long)]
        name: Option<String>,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Disable the watermark
        #[arg(long)]
        no_watermark: bool,

        /// ffmpeg binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,

        /// Font used for the watermark
        #[arg(long)]
        font: Option<PathBuf>,
    },

    /// List render presets
    Presets {
        /// Print the preset table as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check encoder and font availability
    Check {
        /// ffmpeg binary
        #[arg(long)]
        ffmpeg: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = vizrec_common::AppConfig::load();

    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    vizrec_common::logging::init_logging(&config.logging);

    match cli.command {
        Commands::Record {
            preset,
            duration_ms,
            fps,
            name,
            output,
            no_watermark,
            ffmpeg,
            font,
        } => {
            if let Some(dir) = output {
                config.output_dir = dir;
            }
            if let Some(path) = ffmpeg {
                config.recording.ffmpeg_path = path;
            }
            if font.is_some() {
                config.recording.font_path = font;
            }
            let request = commands::record::RecordRequest {
                preset,
                duration_ms,
                fps,
                name,
                watermark: no_watermark.then_some(false),
            };
            commands::record::run(&config, request).await
        }
        Commands::Presets { json } => commands::presets::run(json),
        Commands::Check { ffmpeg } => {
            if let Some(path) = ffmpeg {
                config.recording.ffmpeg_path = path;
            }
            commands::check::run(&config).await
        }
    }
}
