//! Segmentation pipeline.
//!
//! ```text
//!  fetch atlas ──► extract regions ──► ratios vs template mask
//!                                          │
//!   labels CSV ──────────► relabel ◄───────┘
//!                             │
//!                             ▼
//!        <out>/segmented_difumo_atlases/tpl-…/{root}.nii.gz + {root}.tsv
//! ```

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::config::{self, Dimension, Resolution, Selection};
use crate::data::labels::{read_dictionary_labels, relabel, write_label_tsv};
use crate::data::manifest::{self, write_manifest, DatasetDescription};
use crate::data::nifti::{read_volume, write_volume};
use crate::error::{PipelineError, Result};
use crate::fetch::Fetcher;
use crate::regions::{extract_regions, ExtractionParams};
use crate::template::{TemplateCache, TissueMasks};

/// Everything a segmentation run needs to know.
#[derive(Debug, Clone)]
pub struct SegmentationConfig {
    /// Download cache holding raw atlases, labels and the template.
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub selection: Selection,
    pub params: ExtractionParams,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        SegmentationConfig {
            input_path: config::default_input_path(),
            output_path: config::default_output_path(),
            selection: Selection::default(),
            params: ExtractionParams::default(),
        }
    }
}

/// Files written for one dimension/resolution pair.
#[derive(Debug, Clone)]
pub struct AtlasOutput {
    pub dimension: Dimension,
    pub resolution: Resolution,
    pub volume: PathBuf,
    pub labels: PathBuf,
    /// Source component of every extracted region.
    pub regions_idx: Vec<usize>,
}

/// Files written by a whole run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub manifest: PathBuf,
    pub atlases: Vec<AtlasOutput>,
}

fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))
}

/// Segment every selected atlas, stopping at the first failure.
pub fn run(config: &SegmentationConfig, fetcher: &Fetcher) -> Result<RunSummary> {
    // DiFuMo atlases have as many maps as dimensions.
    if let Some(smallest) = config.selection.dimensions.iter().map(|d| d.get()).min() {
        config.params.validate(usize::from(smallest))?;
    }

    let segmented_root = config::segmented_root(&config.output_path);
    create_dir(&segmented_root)?;

    let manifest_path = segmented_root.join(manifest::FILE_NAME);
    write_manifest(&DatasetDescription::segmented_difumo(), &manifest_path)?;
    info!("wrote {}", manifest_path.display());

    let out_dir = config::template_dir(&segmented_root);
    create_dir(&out_dir)?;

    let mut templates = TemplateCache::new();
    let mut atlases = Vec::new();
    for (dim, res) in config.selection.pairs() {
        atlases.push(segment_atlas(config, fetcher, &mut templates, &out_dir, dim, res)?);
    }
    Ok(RunSummary {
        manifest: manifest_path,
        atlases,
    })
}

/// Segment one atlas and write its volume and label table into `out_dir`.
///
/// Labels are read and checked before anything is written for the pair.
pub fn segment_atlas(
    config: &SegmentationConfig,
    fetcher: &Fetcher,
    templates: &mut TemplateCache,
    out_dir: &Path,
    dim: Dimension,
    res: Resolution,
) -> Result<AtlasOutput> {
    info!("DiFuMo {dim} dimensions, {res} mm");
    let files = fetcher.difumo(&config.input_path, dim, res)?;
    let atlas = read_volume(&files.maps)?;
    let labels = read_dictionary_labels(&files.labels)?;
    if labels.len() != atlas.n_volumes() {
        warn!(
            "{} has {} rows for {} components",
            files.labels.display(),
            labels.len(),
            atlas.n_volumes()
        );
    }

    let regions = extract_regions(&atlas, &config.params)?;
    let mask = templates.mask_for(&atlas, || {
        TissueMasks::load(&fetcher.icbm152(&config.input_path)?)
    })?;
    let ratios = regions.maps.dot(mask)?;
    let table = relabel(&labels, &regions.index, &ratios, &files.labels)?;

    let file_root = config::segmented_file_root(dim, res);
    let volume_path = out_dir.join(format!("{file_root}.nii.gz"));
    let labels_path = out_dir.join(format!("{file_root}.tsv"));
    write_volume(&regions.to_volume(&atlas), &volume_path)?;
    write_label_tsv(&table, &labels_path)?;
    info!("{} regions → {}", regions.len(), volume_path.display());

    Ok(AtlasOutput {
        dimension: dim,
        resolution: res,
        volume: volume_path,
        labels: labels_path,
        regions_idx: regions.index,
    })
}
