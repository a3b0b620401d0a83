use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use difumo_segmentation::config::{self, Selection, ALL};
use difumo_segmentation::plot::color::ContourStyle;
use difumo_segmentation::plot::{plot_atlases_image, DisplayConfig};

/// Render JPEG reports of the segmented DiFuMo atlases
#[derive(Parser, Debug)]
#[command(name = "plot-display-maps", version, long_about = None)]
struct Args {
    /// Project root the default paths hang off
    #[arg(long, default_value_os_t = config::project_root())]
    root: PathBuf,

    /// Segmented dataset [default: <root>/data/processed/segmented_difumo_atlases]
    #[arg(short, long)]
    input_path: Option<PathBuf>,

    /// Reports directory [default: <root>/reports]
    #[arg(short, long)]
    output_path: Option<PathBuf>,

    /// Number of dimensions: 64, 128, 256, 512, 1024 or -1 for all
    #[arg(short, long, default_value_t = ALL, allow_negative_numbers = true)]
    dim: i32,

    /// Resolution in mm: 2, 3 or -1 for all
    #[arg(short, long, default_value_t = ALL, allow_negative_numbers = true)]
    res: i32,

    /// Contour level as a fraction of each component's maximum
    #[arg(long, default_value_t = 0.33)]
    percent: f32,

    /// Outline every non-zero voxel instead
    #[arg(long, default_value_t = false)]
    no_threshold: bool,

    /// One colour per component outline instead of black
    #[arg(long, default_value_t = false)]
    colored: bool,

    /// Pixels per voxel
    #[arg(long, default_value_t = 3)]
    zoom: u32,

    /// Enable verbose logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let mut config = DisplayConfig::under(&args.root);
    if let Some(input) = args.input_path {
        config.input_dir = input;
    }
    if let Some(output) = args.output_path {
        config.reports_dir = output;
    }
    config.selection = Selection::resolve(args.dim, args.res).context("Invalid atlas selection")?;
    config.percent = (!args.no_threshold).then_some(args.percent);
    config.contour = if args.colored {
        ContourStyle::Distinct
    } else {
        ContourStyle::Black
    };
    config.zoom = args.zoom;

    let summary = plot_atlases_image(&config).with_context(|| {
        format!("Plotting atlases from {} failed", config.input_dir.display())
    })?;

    let images: usize = summary.outputs.iter().map(|o| o.components.len() + 1).sum();
    info!(
        "wrote {images} images under {}",
        config.reports_dir.display()
    );
    Ok(())
}
