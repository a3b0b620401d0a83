use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use difumo_segmentation::config::{self, Dimension};
use difumo_segmentation::data::synthetic::write_sample;

/// Write a small synthetic atlas and template into the download cache layout
#[derive(Parser, Debug)]
#[command(name = "generate-sample", version, long_about = None)]
struct Args {
    /// Download cache to populate
    #[arg(short, long, default_value_os_t = config::default_input_path())]
    output_path: PathBuf,

    /// Dimension the sample poses as
    #[arg(short, long, default_value_t = 64)]
    dim: i32,

    /// Number of components in the sample atlas
    #[arg(long, default_value_t = 8)]
    components: usize,

    /// Seed of the generator
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let dim = Dimension::try_from(args.dim).context("Invalid dimension")?;
    let files = write_sample(&args.output_path, dim, args.components, args.seed)
        .with_context(|| format!("Failed to write a sample under {}", args.output_path.display()))?;

    for atlas in &files.atlases {
        println!("Wrote {}", atlas.maps.display());
    }
    if let Some(first) = files.atlases.first() {
        println!("Wrote {}", first.labels.display());
    }
    println!("Wrote the template tissue maps under {}", args.output_path.display());
    Ok(())
}
