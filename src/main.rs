//! Slide inspection CLI.

use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use vsi_reader::config::{Cli, Command, DetectArgs, InfoArgs, PropsArgs, TileArgs};
use vsi_reader::convert::argb_words_to_rgba;
use vsi_reader::{detect_vendor, DeepZoom, Slide};

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Detect(args) => run_detect(args),
        Command::Info(args) => run_info(args),
        Command::Props(args) => run_props(args),
        Command::Tile(args) => run_tile(args),
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// =============================================================================
// detect
// =============================================================================

fn run_detect(args: DetectArgs) -> ExitCode {
    match detect_vendor(&args.path) {
        Ok(name) => {
            println!("{}", name);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// info
// =============================================================================

#[derive(Serialize)]
struct LevelSummary {
    level: u32,
    width: u64,
    height: u64,
    downsample: f64,
}

#[derive(Serialize)]
struct SlideSummary {
    path: String,
    vendor: Option<String>,
    plane_count: u32,
    mpp_x: Option<String>,
    mpp_y: Option<String>,
    levels: Vec<LevelSummary>,
    associated_images: Vec<String>,
}

fn open_or_report(path: &std::path::Path) -> Result<Slide, ExitCode> {
    match Slide::open(path) {
        Ok(slide) => {
            if let Some(msg) = slide.get_error() {
                error!("{}: {}", path.display(), msg);
                return Err(ExitCode::FAILURE);
            }
            Ok(slide)
        }
        Err(e) => {
            error!("{}", e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn run_info(args: InfoArgs) -> ExitCode {
    let slide = match open_or_report(&args.path) {
        Ok(slide) => slide,
        Err(code) => return code,
    };

    let summary = SlideSummary {
        path: args.path.display().to_string(),
        vendor: slide
            .property_value(vsi_reader::properties::VENDOR)
            .map(String::from),
        plane_count: slide.plane_count(),
        mpp_x: slide
            .property_value(vsi_reader::properties::MPP_X)
            .map(String::from),
        mpp_y: slide
            .property_value(vsi_reader::properties::MPP_Y)
            .map(String::from),
        levels: (0..slide.level_count())
            .map(|level| {
                let (width, height) = slide.level_dimensions(level).unwrap_or((0, 0));
                LevelSummary {
                    level,
                    width,
                    height,
                    downsample: slide.level_downsample(level).unwrap_or(0.0),
                }
            })
            .collect(),
        associated_images: slide
            .associated_image_names()
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    if args.json {
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("serializing summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", summary.path);
        if let Some(vendor) = &summary.vendor {
            println!("  vendor: {}", vendor);
        }
        println!("  planes: {}", summary.plane_count);
        if let (Some(x), Some(y)) = (&summary.mpp_x, &summary.mpp_y) {
            println!("  mpp: {} x {}", x, y);
        }
        for l in &summary.levels {
            println!(
                "  level {}: {} x {} (downsample {})",
                l.level, l.width, l.height, l.downsample
            );
        }
        for name in &summary.associated_images {
            println!("  associated: {}", name);
        }
    }

    ExitCode::SUCCESS
}

// =============================================================================
// props
// =============================================================================

fn run_props(args: PropsArgs) -> ExitCode {
    let slide = match open_or_report(&args.path) {
        Ok(slide) => slide,
        Err(code) => return code,
    };

    for name in slide.property_names() {
        println!("{} = {}", name, slide.property_value(name).unwrap_or(""));
    }

    ExitCode::SUCCESS
}

// =============================================================================
// tile
// =============================================================================

fn run_tile(args: TileArgs) -> ExitCode {
    if let Err(e) = args.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let dz = match DeepZoom::open(&args.path, args.tile_size, args.overlap, args.limit_bounds) {
        Ok(dz) => dz,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(msg) = dz.get_error() {
        error!("{}: {}", args.path.display(), msg);
        return ExitCode::FAILURE;
    }

    let tile = match dz.read_tile(args.plane, args.level, args.col, args.row) {
        Ok(tile) => tile,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let rgba = argb_words_to_rgba(&tile.argb);
    let image = match image::RgbaImage::from_raw(tile.width, tile.height, rgba) {
        Some(image) => image,
        None => {
            error!("tile buffer does not match its dimensions");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = image.save(&args.output) {
        error!("writing {}: {}", args.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        "wrote {} ({} x {} pixels, level {}, tile {}_{})",
        args.output.display(),
        tile.width,
        tile.height,
        args.level,
        args.col,
        args.row
    );

    ExitCode::SUCCESS
}
