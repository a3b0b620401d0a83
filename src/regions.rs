//! Region extraction: split each probabilistic component into contiguous
//! regions.
//!
//! ```text
//!  4D maps (X, Y, Z, K)
//!        │  ratio threshold over the whole 4D map
//!        ▼
//!  per component: 6-connected labeling → drop regions ≤ min size
//!        │
//!        ▼
//!  ExtractedRegions: CSR (M × X·Y·Z) + index[m] = source component
//! ```

use log::{debug, info};
use ndarray::{Array3, Array4, ArrayView3, Axis};

use crate::data::nifti::Volume;
use crate::error::{PipelineError, Result};
use crate::sparse::CsrMatrix;

const NEIGHBOURS: [[isize; 3]; 6] = [
    [-1, 0, 0],
    [1, 0, 0],
    [0, -1, 0],
    [0, 1, 0],
    [0, 0, -1],
    [0, 0, 1],
];

/// Knobs of the extraction step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionParams {
    /// Fraction of one volume's worth of voxels kept across all components.
    pub threshold: f64,
    /// Regions must be strictly larger than this, in mm³.
    pub min_region_size: f64,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        ExtractionParams {
            threshold: 1.0,
            min_region_size: 1350.0,
        }
    }
}

impl ExtractionParams {
    /// Reject settings an atlas of `n_maps` components cannot use.
    pub fn validate(&self, n_maps: usize) -> Result<()> {
        let t = self.threshold;
        if !(t.is_finite() && t > 0.0) {
            return Err(PipelineError::Config(format!(
                "threshold ratio must be a positive number, got {t}"
            )));
        }
        if t > n_maps as f64 {
            return Err(PipelineError::Config(format!(
                "threshold ratio {t} is larger than the {n_maps} maps of the atlas"
            )));
        }
        let size = self.min_region_size;
        if !(size.is_finite() && size >= 0.0) {
            return Err(PipelineError::Config(format!(
                "minimum region size must be a non-negative number, got {size}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Extracted regions
// ---------------------------------------------------------------------------

/// Region maps of one atlas, one CSR row per region over flattened voxels.
#[derive(Debug, Clone)]
pub struct ExtractedRegions {
    pub shape: [usize; 3],
    pub maps: CsrMatrix,
    /// Source component of every region, in extraction order.
    pub index: Vec<usize>,
}

impl ExtractedRegions {
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Dense (X, Y, Z, M) array of the region maps.
    pub fn to_array(&self) -> Array4<f32> {
        let [nx, ny, nz] = self.shape;
        let mut out = Array4::<f32>::zeros((nx, ny, nz, self.len()));
        for m in 0..self.len() {
            for (flat, v) in self.maps.row(m) {
                out[[flat / (ny * nz), (flat / nz) % ny, flat % nz, m]] = v;
            }
        }
        out
    }

    /// Region maps in the geometry of the atlas they were extracted from.
    pub fn to_volume(&self, atlas: &Volume) -> Volume {
        atlas.with_data(self.to_array())
    }
}

// ---------------------------------------------------------------------------
// Thresholding
// ---------------------------------------------------------------------------

/// Cutoff keeping roughly `ratio` volumes' worth of the strongest voxels.
///
/// Linear-interpolated percentile `100 - 100 / K * ratio` of |values| over
/// the whole 4D array, NaNs counted as zeros.
pub fn ratio_threshold(maps: &Array4<f32>, ratio: f64) -> Result<f32> {
    if !(ratio.is_finite() && ratio > 0.0) {
        return Err(PipelineError::Config(format!(
            "threshold ratio must be a positive number, got {ratio}"
        )));
    }
    let n_maps = maps.len_of(Axis(3));
    if maps.is_empty() || n_maps == 0 {
        return Err(PipelineError::Shape("cannot threshold an empty atlas".into()));
    }
    if ratio > n_maps as f64 {
        return Err(PipelineError::Config(format!(
            "threshold ratio {ratio} is larger than the {n_maps} maps of the atlas"
        )));
    }

    let mut non_zero: Vec<f32> = maps
        .iter()
        .map(|v| if v.is_nan() { 0.0 } else { v.abs() })
        .filter(|&v| v != 0.0)
        .collect();
    non_zero.sort_unstable_by(f32::total_cmp);
    let n_zero = maps.len() - non_zero.len();
    let sorted_at = |rank: usize| -> f64 {
        if rank < n_zero {
            0.0
        } else {
            f64::from(non_zero[rank - n_zero])
        }
    };

    let q = (100.0 - 100.0 / n_maps as f64 * ratio).clamp(0.0, 100.0);
    let pos = q / 100.0 * (maps.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    let value = if frac > 0.0 {
        sorted_at(lo) + (sorted_at(lo + 1) - sorted_at(lo)) * frac
    } else {
        sorted_at(lo)
    };
    Ok(value as f32)
}

// ---------------------------------------------------------------------------
// Connected components
// ---------------------------------------------------------------------------

/// 6-connected labeling of `true` voxels.
///
/// Labels start at 1 and follow row-major order of each region's first
/// voxel; 0 is background. Returns the label array and the label count.
pub fn label_components(mask: ArrayView3<'_, bool>) -> (Array3<u32>, usize) {
    let dims = mask.dim();
    let bounds = [dims.0, dims.1, dims.2];
    let mut labels = Array3::<u32>::zeros(dims);
    let mut count = 0u32;
    let mut stack: Vec<[usize; 3]> = Vec::new();

    for ((x, y, z), &on) in mask.indexed_iter() {
        if !on || labels[[x, y, z]] != 0 {
            continue;
        }
        count += 1;
        labels[[x, y, z]] = count;
        stack.push([x, y, z]);

        while let Some(p) = stack.pop() {
            for offset in NEIGHBOURS {
                let Some(q) = step(p, offset, bounds) else {
                    continue;
                };
                if mask[q] && labels[q] == 0 {
                    labels[q] = count;
                    stack.push(q);
                }
            }
        }
    }
    (labels, count as usize)
}

fn step(p: [usize; 3], offset: [isize; 3], bounds: [usize; 3]) -> Option<[usize; 3]> {
    let mut q = [0usize; 3];
    for i in 0..3 {
        let c = p[i].checked_add_signed(offset[i])?;
        if c >= bounds[i] {
            return None;
        }
        q[i] = c;
    }
    Some(q)
}

/// Keep only the biggest 6-connected region of `mask` (first one on ties).
pub fn largest_component(mask: ArrayView3<'_, bool>) -> Array3<bool> {
    let (labels, count) = label_components(mask);
    if count == 0 {
        return Array3::from_elem(mask.dim(), false);
    }
    let mut sizes = vec![0usize; count + 1];
    for &l in labels.iter() {
        sizes[l as usize] += 1;
    }
    let mut best = 1;
    for l in 2..=count {
        if sizes[l] > sizes[best] {
            best = l;
        }
    }
    labels.mapv(|l| l as usize == best)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Split every component of `atlas` into its contiguous regions.
pub fn extract_regions(atlas: &Volume, params: &ExtractionParams) -> Result<ExtractedRegions> {
    let cutoff = ratio_threshold(&atlas.data, params.threshold)?;
    let voxel_volume = atlas.affine().voxel_volume();
    if !(voxel_volume > 0.0) {
        return Err(PipelineError::Shape(
            "atlas affine has a degenerate voxel volume".into(),
        ));
    }
    let min_voxels = params.min_region_size / voxel_volume;
    debug!("threshold cutoff {cutoff}, regions need more than {min_voxels:.2} voxels");

    let shape = atlas.shape3();
    let mut maps = CsrMatrix::new(shape.iter().product());
    let mut index = Vec::new();

    for k in 0..atlas.n_volumes() {
        let thresholded = atlas
            .component(k)
            .mapv(|v| if v.is_nan() || v.abs() < cutoff { 0.0 } else { v });
        let (labels, count) = label_components(thresholded.map(|&v| v != 0.0).view());

        let mut members: Vec<Vec<(usize, f32)>> = vec![Vec::new(); count + 1];
        for (flat, (&label, &value)) in labels.iter().zip(thresholded.iter()).enumerate() {
            if label != 0 {
                members[label as usize].push((flat, value));
            }
        }

        let mut kept = 0;
        for region in members.into_iter().skip(1) {
            if region.len() as f64 > min_voxels {
                maps.push_row(region);
                index.push(k);
                kept += 1;
            }
        }
        debug!("component {k}: {count} regions, {kept} kept");
    }

    info!(
        "extracted {} regions from {} components",
        index.len(),
        atlas.n_volumes()
    );
    Ok(ExtractedRegions { shape, maps, index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::affine::Affine;

    fn unit_volume(data: Array4<f32>) -> Volume {
        Volume::new(data, &Affine::identity())
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        // |values| sorted: 0, 1, 2, 3 ; K = 2, ratio 1 → 50th percentile = 1.5
        let maps = Array4::from_shape_vec((2, 1, 1, 2), vec![0.0, -3.0, 2.0, 1.0]).unwrap();
        let cut = ratio_threshold(&maps, 1.0).unwrap();
        assert!((cut - 1.5).abs() < 1e-6);
    }

    #[test]
    fn nan_counts_as_zero_and_bad_ratio_is_rejected() {
        let maps = Array4::from_shape_vec((1, 1, 1, 2), vec![f32::NAN, 4.0]).unwrap();
        assert_eq!(ratio_threshold(&maps, 1.0).unwrap(), 2.0);
        assert!(matches!(
            ratio_threshold(&maps, 0.0),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn ratio_above_map_count_is_rejected() {
        let maps = Array4::from_shape_vec((2, 1, 1, 2), vec![0.0, -3.0, 2.0, 1.0]).unwrap();
        assert!(ratio_threshold(&maps, 2.0).is_ok());
        assert!(matches!(
            ratio_threshold(&maps, 2.5),
            Err(PipelineError::Config(_))
        ));

        let params = ExtractionParams {
            threshold: 65.0,
            ..ExtractionParams::default()
        };
        assert!(matches!(params.validate(64), Err(PipelineError::Config(_))));
        assert!(params.validate(128).is_ok());
        let negative = ExtractionParams {
            min_region_size: -1.0,
            ..ExtractionParams::default()
        };
        assert!(negative.validate(64).is_err());
    }

    #[test]
    fn labels_follow_scan_order_with_face_connectivity() {
        let mut mask = Array3::from_elem((3, 3, 1), false);
        mask[[0, 0, 0]] = true;
        mask[[0, 1, 0]] = true;
        // diagonal neighbour: separate region
        mask[[1, 2, 0]] = true;
        mask[[2, 0, 0]] = true;
        let (labels, count) = label_components(mask.view());
        assert_eq!(count, 3);
        assert_eq!(labels[[0, 0, 0]], 1);
        assert_eq!(labels[[0, 1, 0]], 1);
        assert_eq!(labels[[1, 2, 0]], 2);
        assert_eq!(labels[[2, 0, 0]], 3);
        assert_eq!(labels[[1, 1, 0]], 0);
    }

    #[test]
    fn largest_component_wins() {
        let mut mask = Array3::from_elem((5, 1, 1), false);
        mask[[0, 0, 0]] = true;
        mask[[2, 0, 0]] = true;
        mask[[3, 0, 0]] = true;
        mask[[4, 0, 0]] = true;
        let big = largest_component(mask.view());
        assert!(!big[[0, 0, 0]]);
        assert!(big[[2, 0, 0]] && big[[3, 0, 0]] && big[[4, 0, 0]]);
    }

    /// Two components on a 10×4×4 grid: component 0 holds two separate
    /// blocks, component 1 one block, component 2 is empty.
    fn three_component_atlas() -> Volume {
        let mut data = Array4::<f32>::zeros((10, 4, 4, 3));
        for x in 0..3 {
            for y in 0..4 {
                for z in 0..4 {
                    data[[x, y, z, 0]] = 1.0;
                    data[[x + 6, y, z, 0]] = 2.0;
                    data[[x + 3, y, z, 1]] = 3.0;
                }
            }
        }
        unit_volume(data)
    }

    #[test]
    fn extraction_maps_regions_back_to_components() {
        let atlas = three_component_atlas();
        let params = ExtractionParams {
            threshold: 3.0,
            min_region_size: 10.0,
        };
        let regions = extract_regions(&atlas, &params).unwrap();
        assert_eq!(regions.index, vec![0, 0, 1]);
        assert!(regions.len() <= 3);

        let dense = regions.to_array();
        assert_eq!(dense.shape(), &[10, 4, 4, regions.len()]);
        assert_eq!(dense[[0, 0, 0, 0]], 1.0);
        assert_eq!(dense[[6, 0, 0, 0]], 0.0);
        assert_eq!(dense[[6, 3, 3, 1]], 2.0);
        assert_eq!(dense[[4, 1, 2, 2]], 3.0);
        assert_eq!(regions.maps.nnz(), 3 * 48);
    }

    #[test]
    fn small_regions_are_dropped() {
        let atlas = three_component_atlas();
        // each block is 48 voxels of 1 mm³: not strictly greater than 48
        let params = ExtractionParams {
            threshold: 3.0,
            min_region_size: 48.0,
        };
        let regions = extract_regions(&atlas, &params).unwrap();
        assert!(regions.is_empty());
        assert_eq!(regions.to_array().shape(), &[10, 4, 4, 0]);
    }

    #[test]
    fn threshold_splits_a_component() {
        // a bridge of weak voxels joins two strong blocks
        let mut data = Array4::<f32>::zeros((7, 2, 2, 1));
        for y in 0..2 {
            for z in 0..2 {
                for x in 0..3 {
                    data[[x, y, z, 0]] = 5.0;
                    data[[x + 4, y, z, 0]] = 5.0;
                }
                data[[3, y, z, 0]] = 0.1;
            }
        }
        let atlas = unit_volume(data);
        let params = ExtractionParams {
            threshold: 0.8,
            min_region_size: 1.0,
        };
        let regions = extract_regions(&atlas, &params).unwrap();
        assert_eq!(regions.index, vec![0, 0]);
    }
}
