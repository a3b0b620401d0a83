use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use difumo_segmentation::config::{self, Selection, ALL};
use difumo_segmentation::fetch::Fetcher;
use difumo_segmentation::pipeline::{self, SegmentationConfig};
use difumo_segmentation::regions::ExtractionParams;

/// Segment the DiFuMo atlases into contiguous regions with tissue ratios
#[derive(Parser, Debug)]
#[command(name = "difumo-segmentation", version, long_about = None)]
struct Args {
    /// Download cache for the raw atlases and the template
    #[arg(short, long, default_value_os_t = config::default_input_path())]
    input_path: PathBuf,

    /// Where segmented_difumo_atlases/ is written
    #[arg(short, long, default_value_os_t = config::default_output_path())]
    output_path: PathBuf,

    /// Number of dimensions: 64, 128, 256, 512, 1024 or -1 for all
    #[arg(short, long, default_value_t = ALL, allow_negative_numbers = true)]
    dim: i32,

    /// Resolution in mm: 2, 3 or -1 for all
    #[arg(short, long, default_value_t = ALL, allow_negative_numbers = true)]
    res: i32,

    /// Fraction of one volume's worth of voxels kept when thresholding
    #[arg(long, default_value_t = 1.0)]
    threshold: f64,

    /// Smallest region kept, in mm³ (regions must be strictly larger)
    #[arg(long, default_value_t = 1350.0)]
    min_region_size: f64,

    /// Only use files already in the download cache
    #[arg(long, default_value_t = false)]
    offline: bool,

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

    let selection =
        Selection::resolve(args.dim, args.res).context("Invalid atlas selection")?;
    let config = SegmentationConfig {
        input_path: args.input_path,
        output_path: args.output_path,
        selection,
        params: ExtractionParams {
            threshold: args.threshold,
            min_region_size: args.min_region_size,
        },
    };

    let fetcher = if args.offline {
        Fetcher::offline()
    } else {
        Fetcher::new().context("Failed to set up the downloader")?
    };

    let summary = pipeline::run(&config, &fetcher).with_context(|| {
        format!(
            "Segmentation into {} failed",
            config.output_path.display()
        )
    })?;

    info!(
        "segmented {} atlases, manifest at {}",
        summary.atlases.len(),
        summary.manifest.display()
    );
    Ok(())
}
