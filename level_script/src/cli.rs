use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Runs a level script against a scripted entity list",
    version
)]
pub struct Args {
    /// Game directory holding the scripts folder
    #[arg(long, default_value = "baseq2")]
    pub game_dir: PathBuf,

    /// Optional JSON script configuration (overrides --game-dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Level whose script should be loaded
    #[arg(long)]
    pub level: String,

    /// JSON file listing the level's entities as key/value objects
    #[arg(long)]
    pub entities: Option<PathBuf>,

    /// Targetname to trigger after loading; repeat to fire several in order
    #[arg(long, value_name = "TARGETNAME")]
    pub fire: Vec<String>,

    /// Frames to simulate after firing so delayed actions can run
    #[arg(long, default_value_t = 0)]
    pub frames: u32,

    /// Seconds of game time per simulated frame
    #[arg(long, default_value_t = 0.1)]
    pub frame_time: f32,

    /// Path to write both variable tables as JSON once the run ends
    #[arg(long)]
    pub save_json: Option<PathBuf>,

    /// Saved variables to restore before firing (as written by --save-json)
    #[arg(long)]
    pub restore_json: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunArgs {
    pub game_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub level: String,
    pub entities: Option<PathBuf>,
    pub fire: Vec<String>,
    pub frames: u32,
    pub frame_time: f32,
    pub save_json: Option<PathBuf>,
    pub restore_json: Option<PathBuf>,
}

pub fn parse() -> Result<RunArgs> {
    Args::parse().into_run_args()
}

impl Args {
    fn into_run_args(self) -> Result<RunArgs> {
        if self.level.trim().is_empty() {
            bail!("--level must name a level");
        }
        if !self.frame_time.is_finite() || self.frame_time <= 0.0 {
            bail!("--frame-time must be positive");
        }
        if !self.fire.is_empty() && self.entities.is_none() {
            bail!("--fire requires --entities");
        }
        Ok(RunArgs {
            game_dir: self.game_dir,
            config: self.config,
            level: self.level,
            entities: self.entities,
            fire: self.fire,
            frames: self.frames,
            frame_time: self.frame_time,
            save_json: self.save_json,
            restore_json: self.restore_json,
        })
    }
}
