//! # Tessel CLI
//!
//! Command-line driver for the Tessel light culling pipeline.
//!
//! ## Commands
//! - `simulate` - Run a headless light stress scenario and print a summary
//! - `tiles` - Print the tile grid and dispatch sizes for a surface

pub mod simulate;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tessel_render::TileGrid;

pub use simulate::{SimulationConfig, SimulationOptions, SimulationSummary, run_simulation};

/// Tessel light culling CLI
#[derive(Parser)]
#[command(name = "tessel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the headless light stress scenario
    Simulate {
        /// Frames to run
        #[arg(short, long, default_value = "120")]
        frames: u32,

        /// Lights per grid axis in each light set
        #[arg(short, long, default_value = "8")]
        grid: u32,

        /// Random seed
        #[arg(short, long, default_value = "1")]
        seed: u64,

        /// JSON file with lighting and memory settings
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Initial surface width in pixels
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Initial surface height in pixels
        #[arg(long, default_value = "720")]
        height: u32,
    },

    /// Print tile counts and dispatch sizes
    Tiles {
        /// Surface width in pixels
        #[arg(long)]
        width: u32,

        /// Surface height in pixels
        #[arg(long)]
        height: u32,

        /// Tile edge in pixels
        #[arg(short, long, default_value = "16")]
        tile_size: u32,
    },
}

/// Initialize `env_logger`, honoring `RUST_LOG` over the verbosity switch
pub fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Tile layout and dispatch shapes of one surface
#[derive(Debug, Serialize)]
pub struct TileReport {
    pub width: u32,
    pub height: u32,
    pub grid: TileGrid,
    pub tiles: u32,
    pub frustum_threads: [u32; 2],
    pub frustum_groups: [u32; 3],
    pub culling_threads: [u32; 2],
    pub culling_groups: [u32; 3],
}

impl TileReport {
    /// Describe a `width` x `height` surface cut into `tile_size` tiles
    pub fn new(width: u32, height: u32, tile_size: u32) -> Result<Self> {
        anyhow::ensure!(tile_size > 0, "tile size must be positive");
        let grid = TileGrid::new(width, height, tile_size);
        Ok(Self {
            width,
            height,
            grid,
            tiles: grid.tiles(),
            frustum_threads: grid.frustum_threads(),
            frustum_groups: grid.frustum_groups(),
            culling_threads: grid.culling_threads(),
            culling_groups: grid.culling_groups(),
        })
    }
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Simulate {
            frames,
            grid,
            seed,
            config,
            width,
            height,
        } => {
            let config = match config {
                Some(path) => SimulationConfig::load(&path)?,
                None => SimulationConfig::default(),
            };
            let options = SimulationOptions {
                frames,
                grid,
                seed,
                width,
                height,
            };

            log::info!("Simulating {} frames, {}^3 lights per set, seed {}", frames, grid, seed);
            let summary = run_simulation(&config, &options)?;
            println!("{}", serde_json::to_string_pretty(&summary).context("serializing summary")?);
        }

        Commands::Tiles {
            width,
            height,
            tile_size,
        } => {
            let report = TileReport::new(width, height, tile_size)?;
            println!("{}", serde_json::to_string_pretty(&report).context("serializing tile report")?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from(["tessel", "simulate"]);
        if let Commands::Simulate { frames, grid, config, .. } = cli.command {
            assert_eq!(frames, 120);
            assert_eq!(grid, 8);
            assert!(config.is_none());
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn test_tiles_command() {
        let cli = Cli::parse_from(["tessel", "-v", "tiles", "--width", "1920", "--height", "1080", "-t", "32"]);
        assert!(cli.verbose);
        if let Commands::Tiles { width, height, tile_size } = cli.command {
            assert_eq!((width, height, tile_size), (1920, 1080, 32));
        } else {
            panic!("Expected Tiles command");
        }
    }

    #[test]
    fn test_tile_report() {
        let report = TileReport::new(1920, 1080, 16).unwrap();
        assert_eq!(report.grid.tile_count, [120, 68]);
        assert_eq!(report.tiles, 8160);
        assert_eq!(report.frustum_groups, [8, 5, 1]);
        assert_eq!(report.culling_threads, [1920, 1088]);

        assert!(TileReport::new(1920, 1080, 0).is_err());
    }
}
