use std::path::Path;

use log::{debug, info};
use ndarray::{Array3, ArrayView3};

use crate::data::affine::Affine;
use crate::data::nifti::{read_volume, Volume};
use crate::error::{PipelineError, Result};
use crate::fetch::Icbm152Files;
use crate::sparse::CsrMatrix;

/// Column order of every template mask and ratio matrix.
pub const TISSUES: [&str; 3] = ["GM", "WM", "CSF"];

// ---------------------------------------------------------------------------
// Source tissue probability maps
// ---------------------------------------------------------------------------

/// Gray / white / CSF probability maps of the structural template.
#[derive(Debug, Clone)]
pub struct TissueMasks {
    pub gm: Volume,
    pub wm: Volume,
    pub csf: Volume,
}

impl TissueMasks {
    pub fn load(files: &Icbm152Files) -> Result<Self> {
        let masks = TissueMasks {
            gm: read_volume(&files.gm)?,
            wm: read_volume(&files.wm)?,
            csf: read_volume(&files.csf)?,
        };
        for (name, vol, path) in [
            ("WM", &masks.wm, &files.wm),
            ("CSF", &masks.csf, &files.csf),
        ] {
            if vol.shape3() != masks.gm.shape3() {
                return Err(shape_error(name, path, vol.shape3(), masks.gm.shape3()));
            }
        }
        Ok(masks)
    }

    fn all(&self) -> [&Volume; 3] {
        [&self.gm, &self.wm, &self.csf]
    }
}

fn shape_error(name: &str, path: &Path, got: [usize; 3], want: [usize; 3]) -> PipelineError {
    PipelineError::Shape(format!(
        "{name} mask {} is {got:?}, expected {want:?}",
        path.display()
    ))
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Trilinear resampling of `source` onto a `shape` grid placed by `target_affine`.
///
/// Target voxels whose world position falls outside the source grid get 0.
pub fn resample_to_grid(
    source: ArrayView3<'_, f32>,
    source_affine: &Affine,
    shape: [usize; 3],
    target_affine: &Affine,
) -> Result<Array3<f32>> {
    let world_to_source = source_affine
        .inverse()
        .ok_or_else(|| PipelineError::Shape("template affine is singular".into()))?;
    let target_to_source = world_to_source.compose(target_affine);
    let dims = source.dim();
    let bounds = [dims.0, dims.1, dims.2];

    Ok(Array3::from_shape_fn((shape[0], shape[1], shape[2]), |(x, y, z)| {
        let p = target_to_source.apply([x as f64, y as f64, z as f64]);
        trilinear(&source, bounds, p)
    }))
}

fn trilinear(source: &ArrayView3<'_, f32>, bounds: [usize; 3], p: [f64; 3]) -> f32 {
    const EPS: f64 = 1e-6;
    let mut lo = [0usize; 3];
    let mut hi = [0usize; 3];
    let mut frac = [0f64; 3];
    for i in 0..3 {
        let max = (bounds[i] - 1) as f64;
        if p[i] < -EPS || p[i] > max + EPS {
            return 0.0;
        }
        let c = p[i].clamp(0.0, max);
        lo[i] = c.floor() as usize;
        hi[i] = (lo[i] + 1).min(bounds[i] - 1);
        frac[i] = c - lo[i] as f64;
    }

    let mut acc = 0.0f64;
    for corner in 0..8 {
        let mut weight = 1.0;
        let mut idx = [0usize; 3];
        for i in 0..3 {
            if corner & (1 << i) != 0 {
                weight *= frac[i];
                idx[i] = hi[i];
            } else {
                weight *= 1.0 - frac[i];
                idx[i] = lo[i];
            }
        }
        if weight != 0.0 {
            acc += weight * f64::from(source[idx]);
        }
    }
    acc as f32
}

/// Resample the three tissue maps onto `atlas` and stack them as a
/// (voxels × 3) sparse matrix in row-major voxel order.
pub fn build_template_mask(masks: &TissueMasks, atlas: &Volume) -> Result<CsrMatrix> {
    let shape = atlas.shape3();
    let target_affine = atlas.affine();
    let resampled = masks
        .all()
        .map(|vol| resample_to_grid(vol.component(0), &vol.affine(), shape, &target_affine));
    let [gm, wm, csf] = resampled;
    let (gm, wm, csf) = (gm?, wm?, csf?);

    let mut mask = CsrMatrix::new(TISSUES.len());
    for ((g, w), c) in gm.iter().zip(wm.iter()).zip(csf.iter()) {
        mask.push_row([(0, *g), (1, *w), (2, *c)]);
    }
    debug!(
        "template mask: {} voxels, {} non-zero entries",
        mask.nrows(),
        mask.nnz()
    );
    Ok(mask)
}

// ---------------------------------------------------------------------------
// Cache across atlases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct Grid {
    shape: [usize; 3],
    affine: Affine,
}

/// Template masks computed once per atlas grid and reused for the whole run.
///
/// Every DiFuMo dimension shares the grid of its resolution, so a full run
/// resamples the template twice.
#[derive(Debug, Default)]
pub struct TemplateCache {
    masks: Option<TissueMasks>,
    entries: Vec<(Grid, CsrMatrix)>,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct grids resampled so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mask on the grid of `atlas`, resampling on first use.
    ///
    /// `load` runs at most once per cache, the first time any grid misses.
    pub fn mask_for<F>(&mut self, atlas: &Volume, load: F) -> Result<&CsrMatrix>
    where
        F: FnOnce() -> Result<TissueMasks>,
    {
        let grid = Grid {
            shape: atlas.shape3(),
            affine: atlas.affine(),
        };
        let pos = match self.entries.iter().position(|(g, _)| *g == grid) {
            Some(pos) => pos,
            None => {
                if self.masks.is_none() {
                    self.masks = Some(load()?);
                }
                let masks = self
                    .masks
                    .as_ref()
                    .ok_or_else(|| PipelineError::Shape("template masks unavailable".into()))?;
                info!("resampling template masks onto {:?} grid", grid.shape);
                let mask = build_template_mask(masks, atlas)?;
                self.entries.push((grid, mask));
                self.entries.len() - 1
            }
        };
        Ok(&self.entries[pos].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn ramp(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(x, y, z)| (x + 2 * y + 3 * z) as f32)
    }

    #[test]
    fn identical_grid_is_identity() {
        let src = ramp((4, 5, 6));
        let a = Affine::scaling([2.0, 2.0, 2.0], [-4.0, -5.0, -6.0]);
        let out = resample_to_grid(src.view(), &a, [4, 5, 6], &a).unwrap();
        for (o, s) in out.iter().zip(src.iter()) {
            assert!((o - s).abs() < 1e-5);
        }
    }

    #[test]
    fn half_voxel_shift_interpolates_linearly() {
        let src = ramp((4, 1, 1));
        let source_affine = Affine::identity();
        let target_affine = Affine::scaling([1.0, 1.0, 1.0], [0.5, 0.0, 0.0]);
        let out = resample_to_grid(src.view(), &source_affine, [4, 1, 1], &target_affine).unwrap();
        assert!((out[[0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((out[[2, 0, 0]] - 2.5).abs() < 1e-6);
        // x = 3.5 falls outside the source grid
        assert_eq!(out[[3, 0, 0]], 0.0);
    }

    #[test]
    fn coarser_grid_samples_world_positions() {
        let src = ramp((8, 8, 8));
        let out = resample_to_grid(
            src.view(),
            &Affine::identity(),
            [4, 4, 4],
            &Affine::scaling([2.0, 2.0, 2.0], [0.0; 3]),
        )
        .unwrap();
        assert_eq!(out[[1, 2, 3]], src[[2, 4, 6]]);
    }

    fn tissue(value: f32) -> Volume {
        let data = Array4::from_elem((4, 4, 4, 1), value);
        Volume::new(data, &Affine::identity())
    }

    fn masks() -> TissueMasks {
        TissueMasks {
            gm: tissue(0.5),
            wm: tissue(0.25),
            csf: tissue(0.0),
        }
    }

    #[test]
    fn mask_rows_follow_voxels() {
        let atlas = Volume::new(Array4::zeros((4, 4, 4, 2)), &Affine::identity());
        let mask = build_template_mask(&masks(), &atlas).unwrap();
        assert_eq!(mask.nrows(), 64);
        assert_eq!(mask.ncols(), 3);
        // CSF is zero everywhere and not stored
        assert_eq!(mask.nnz(), 128);
        assert_eq!(mask.row(10).collect::<Vec<_>>(), vec![(0, 0.5), (1, 0.25)]);
    }

    #[test]
    fn ratios_pair_each_region_voxel_with_its_tissue_voxel() {
        use crate::regions::{extract_regions, ExtractionParams};

        let shape = (3, 4, 5);
        let grid = |f: fn(usize, usize, usize) -> f32| {
            let data = Array3::from_shape_fn(shape, |(x, y, z)| f(x, y, z));
            Volume::new(data.insert_axis(ndarray::Axis(3)), &Affine::identity())
        };
        let tissues = TissueMasks {
            gm: grid(|x, _, _| x as f32 + 1.0),
            wm: grid(|_, y, _| 2.0 * y as f32 + 1.0),
            csf: grid(|_, _, z| (z * z) as f32 + 1.0),
        };
        let maps = Array4::from_shape_fn((3, 4, 5, 2), |(x, y, z, k)| {
            if k == 0 {
                1.0 + x as f32 + 0.5 * y as f32 + 0.25 * z as f32
            } else {
                20.0 - x as f32 - 2.0 * y as f32 - z as f32
            }
        });
        let atlas = Volume::new(maps, &Affine::identity());

        // a ratio of K keeps every voxel, so each component is one region
        let params = ExtractionParams {
            threshold: 2.0,
            min_region_size: 0.0,
        };
        let regions = extract_regions(&atlas, &params).unwrap();
        assert_eq!(regions.index, vec![0, 1]);

        let mask = build_template_mask(&tissues, &atlas).unwrap();
        let ratios = regions.maps.dot(&mask).unwrap();
        let dense = regions.to_array();
        let tissue_maps = [
            tissues.gm.component(0),
            tissues.wm.component(0),
            tissues.csf.component(0),
        ];
        for m in 0..regions.len() {
            for (j, tissue) in tissue_maps.iter().enumerate() {
                let expected: f64 = tissue
                    .indexed_iter()
                    .map(|((x, y, z), &v)| f64::from(dense[[x, y, z, m]]) * f64::from(v))
                    .sum();
                let got = ratios[[m, j]];
                assert!(
                    (got - expected).abs() <= 1e-9 * expected.abs(),
                    "region {m} tissue {j}: {got} vs {expected}"
                );
            }
        }
    }

    #[test]
    fn cache_resamples_once_per_grid() {
        let mut cache = TemplateCache::new();
        let mut loads = 0;
        let a2 = Volume::new(Array4::zeros((4, 4, 4, 3)), &Affine::identity());
        let a3 = Volume::new(
            Array4::zeros((2, 2, 2, 3)),
            &Affine::scaling([2.0, 2.0, 2.0], [0.0; 3]),
        );

        for atlas in [&a2, &a2, &a3, &a2] {
            cache
                .mask_for(atlas, || {
                    loads += 1;
                    Ok(masks())
                })
                .unwrap();
        }
        assert_eq!(loads, 1);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.mask_for(&a3, || unreachable!()).unwrap().nrows(), 8);
    }
}
