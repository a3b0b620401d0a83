use std::fs;
use std::path::{Path, PathBuf};

use image::{ImageFormat, RgbImage};
use log::{debug, info};
use ndarray::{Array4, Axis};

use super::color::{ContourColors, ContourStyle};
use super::render::{
    composite_cut_coords, find_xyz_cut_coords, render_prob_atlas, render_stat_map, support_mask,
};
use crate::config::{self, Dimension, Resolution, Selection};
use crate::data::labels::read_label_tsv;
use crate::data::nifti::read_volume;
use crate::error::{PipelineError, Result};

/// Column holding the human-readable component names.
const NAME_COLUMN: &str = "Difumo_names";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DisplayConfig {
    /// Root of the segmented dataset (holds `dataset_description.json`).
    pub input_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub selection: Selection,
    /// Fraction of each component's maximum used as its contour level.
    /// `None` outlines every non-zero voxel.
    pub percent: Option<f32>,
    pub contour: ContourStyle,
    /// Pixels per voxel.
    pub zoom: u32,
}

impl DisplayConfig {
    pub fn under(root: &Path) -> Self {
        DisplayConfig {
            input_dir: config::segmented_root(&root.join("data").join("processed")),
            reports_dir: root.join("reports"),
            selection: Selection::default(),
            percent: Some(0.33),
            contour: ContourStyle::default(),
            zoom: 3,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig::under(&config::project_root())
    }
}

/// Images written for one dimension/resolution pair.
#[derive(Debug, Clone)]
pub struct DisplayOutput {
    pub dimension: Dimension,
    pub resolution: Resolution,
    pub composite: PathBuf,
    pub components: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct DisplaySummary {
    pub outputs: Vec<DisplayOutput>,
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Contour level of every component: its maximum scaled by `percent`.
pub fn component_thresholds(maps: &Array4<f32>, percent: f32) -> Vec<f32> {
    maps.axis_iter(Axis(3))
        .map(|c| {
            let max = c
                .iter()
                .copied()
                .filter(|v| !v.is_nan())
                .fold(f32::NEG_INFINITY, f32::max);
            if max.is_finite() {
                max * percent
            } else {
                0.0
            }
        })
        .collect()
}

fn save_jpeg(img: &RgbImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
    }
    img.save_with_format(path, ImageFormat::Jpeg)
        .map_err(|source| PipelineError::Render {
            path: path.to_path_buf(),
            source,
        })
}

/// Render the composite and per-component images of every selected atlas.
pub fn plot_atlases_image(config: &DisplayConfig) -> Result<DisplaySummary> {
    let mut summary = DisplaySummary::default();
    for (dim, res) in config.selection.pairs() {
        summary.outputs.push(plot_atlas(config, dim, res)?);
    }
    Ok(summary)
}

fn plot_atlas(config: &DisplayConfig, dim: Dimension, res: Resolution) -> Result<DisplayOutput> {
    let tpl_dir = config::template_dir(&config.input_dir);
    let file_root = config::segmented_file_root(dim, res);
    let maps_path = tpl_dir.join(format!("{file_root}.nii.gz"));
    let labels_path = tpl_dir.join(format!("{file_root}.tsv"));

    let atlas = read_volume(&maps_path)?;
    let labels = read_label_tsv(&labels_path)?;
    let n = atlas.n_volumes();
    if labels.len() < n {
        return Err(PipelineError::format(
            "label TSV",
            &labels_path,
            format!("{} rows for {n} components", labels.len()),
        ));
    }
    let names = labels.column_values(NAME_COLUMN).unwrap_or_default();

    info!("plotting {n} components of {dim} dimensions, {res} mm");
    let thresholds = config
        .percent
        .map(|p| component_thresholds(&atlas.data, p));
    let colors = ContourColors::new(config.contour, n);
    let composite = render_prob_atlas(
        &atlas.data,
        thresholds.as_deref(),
        composite_cut_coords(&atlas.data),
        config.zoom,
        &colors,
    );
    let composite_path = config
        .reports_dir
        .join("imgs")
        .join("display_maps")
        .join(dim.to_string())
        .join(res.to_string())
        .join(format!("{dim}_{res}.jpg"));
    save_jpeg(&composite, &composite_path)?;
    info!("wrote {}", composite_path.display());

    let support = support_mask(&atlas.data);
    let component_dir = config
        .reports_dir
        .join("imgs")
        .join("component_maps")
        .join(dim.to_string())
        .join(res.to_string());
    let mut components = Vec::with_capacity(n);
    for k in 0..n {
        let map = atlas.component(k);
        let cut = find_xyz_cut_coords(map);
        match names.get(k) {
            Some(name) => debug!("component {k} ({name}) cut at {cut:?}"),
            None => debug!("component {k} cut at {cut:?}"),
        }
        let path = component_dir.join(format!("{k}_{res}.jpg"));
        save_jpeg(&render_stat_map(map, support.view(), cut, config.zoom), &path)?;
        components.push(path);
    }
    info!("wrote {} component maps to {}", components.len(), component_dir.display());

    Ok(DisplayOutput {
        dimension: dim,
        resolution: res,
        composite: composite_path,
        components,
    })
}
