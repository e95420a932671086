//! CLI argument types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default DeepZoom tile side in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 254;

/// Default DeepZoom interior-edge overlap in pixels.
pub const DEFAULT_OVERLAP: u32 = 1;

/// Inspect Olympus VSI whole slide images.
#[derive(Debug, Parser)]
#[command(name = "vsi-reader", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Identify the slide format of a path
    Detect(DetectArgs),

    /// Print slide geometry and metadata
    Info(InfoArgs),

    /// Print the slide property table
    Props(PropsArgs),

    /// Extract one DeepZoom tile as a PNG
    Tile(TileArgs),
}

#[derive(Debug, Args)]
pub struct DetectArgs {
    /// Slide path (.vsi, .ets or .tif)
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct InfoArgs {
    /// Slide path (.vsi, .ets or .tif)
    pub path: PathBuf,

    /// Emit machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct PropsArgs {
    /// Slide path (.vsi, .ets or .tif)
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct TileArgs {
    /// Slide path (.vsi, .ets or .tif)
    pub path: PathBuf,

    /// DeepZoom level
    #[arg(long)]
    pub level: u32,

    /// Tile column
    #[arg(long)]
    pub col: u64,

    /// Tile row
    #[arg(long)]
    pub row: u64,

    /// Plane (channel) index
    #[arg(long, default_value_t = 0)]
    pub plane: u32,

    /// Tile side in pixels
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Interior-edge overlap in pixels
    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    pub overlap: u32,

    /// Crop the pyramid to the declared non-empty region
    #[arg(long)]
    pub limit_bounds: bool,

    /// Output PNG path
    #[arg(short, long)]
    pub output: PathBuf,
}

impl TileArgs {
    /// Sanity-check argument combinations clap cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 {
            return Err("tile size must be positive".to_string());
        }
        if self.output.extension().and_then(|e| e.to_str()) != Some("png") {
            return Err(format!(
                "output {} must have a .png extension",
                self.output.display()
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_detect() {
        let cli = Cli::parse_from(["vsi-reader", "detect", "/data/foo.vsi"]);
        match cli.command {
            Command::Detect(args) => assert_eq!(args.path, PathBuf::from("/data/foo.vsi")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_info_json() {
        let cli = Cli::parse_from(["vsi-reader", "info", "--json", "slide.vsi"]);
        match cli.command {
            Command::Info(args) => assert!(args.json),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_tile_defaults() {
        let cli = Cli::parse_from([
            "vsi-reader",
            "tile",
            "slide.vsi",
            "--level",
            "10",
            "--col",
            "3",
            "--row",
            "2",
            "--output",
            "tile.png",
        ]);
        match cli.command {
            Command::Tile(args) => {
                assert_eq!(args.level, 10);
                assert_eq!((args.col, args.row), (3, 2));
                assert_eq!(args.plane, 0);
                assert_eq!(args.tile_size, DEFAULT_TILE_SIZE);
                assert_eq!(args.overlap, DEFAULT_OVERLAP);
                assert!(!args.limit_bounds);
                assert!(args.validate().is_ok());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_tile_validate_rejects_zero_tile_size() {
        let cli = Cli::parse_from([
            "vsi-reader",
            "tile",
            "s.vsi",
            "--level",
            "0",
            "--col",
            "0",
            "--row",
            "0",
            "--tile-size",
            "0",
            "--output",
            "t.png",
        ]);
        match cli.command {
            Command::Tile(args) => assert!(args.validate().is_err()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_tile_validate_rejects_non_png_output() {
        let cli = Cli::parse_from([
            "vsi-reader",
            "tile",
            "s.vsi",
            "--level",
            "0",
            "--col",
            "0",
            "--row",
            "0",
            "--output",
            "t.jpg",
        ]);
        match cli.command {
            Command::Tile(args) => assert!(args.validate().is_err()),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_verbose_counts() {
        let cli = Cli::parse_from(["vsi-reader", "-vv", "detect", "x.vsi"]);
        assert_eq!(cli.verbose, 2);
    }
}
