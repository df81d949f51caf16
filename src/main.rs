use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use log::{error, info};

use vomap::{
    worker::{spawn_batch, Progress},
    Config, ImageSequence, TrackRecord,
};

#[derive(Parser, Debug)]
#[command(name = "vomap", about = "Monocular camera path and sparse map from an image sequence")]
struct Cli {
    /// Directory of frames, processed in file name order
    #[arg(value_name = "FRAMES_DIR")]
    frames: PathBuf,
    /// JSON config; missing fields keep their defaults
    #[arg(long, env = "VOMAP_CONFIG")]
    config: Option<PathBuf>,
    /// Horizontal field of view in degrees, overrides the config
    #[arg(long, env = "VOMAP_FOV")]
    fov: Option<f64>,
    /// Where the tracking record is written
    #[arg(long, short, default_value = "track_record.json")]
    output: PathBuf,
    /// Stop after this many frames
    #[arg(long)]
    max_frames: Option<u32>,
    /// Keep an existing record of the current version instead of analysing again
    #[arg(long)]
    reuse: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.reuse {
        if let Some(record) = TrackRecord::load(&cli.output)? {
            info!(
                "reusing {} ({} poses, {} map points)",
                cli.output.display(),
                record.path.len(),
                record.point_cloud.len()
            );
            return Ok(());
        }
    }

    let mut config = match &cli.config {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };
    if let Some(fov) = cli.fov {
        config.fov_deg = fov;
    }
    config.validate()?;

    let source = ImageSequence::open(&cli.frames)?;
    let handle = spawn_batch(source, config, cli.max_frames)?;

    for message in handle.progress().iter() {
        match message {
            Progress::Frame {
                frames_processed,
                total,
                snapshot,
            } => info!(
                "{frames_processed}/{} frames, {} tracks, {} map points, {:.1}% triangulated",
                total.map_or_else(|| "?".to_string(), |t| t.to_string()),
                snapshot.stats.active,
                snapshot.stats.in_map,
                snapshot.stats.success_rate_pct
            ),
            Progress::Finished { .. } => break,
        }
    }

    let outcome = handle.join()?;
    info!("stopped: {:?}", outcome.reason);
    TrackRecord::from(&outcome.snapshot).save(&cli.output)?;
    Ok(())
}
