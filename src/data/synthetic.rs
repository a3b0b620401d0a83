//! Small DiFuMo-like atlases for offline runs.
//!
//! Everything is written in the download-cache layout, so the segmentation
//! pipeline picks the files up without touching the network.

use std::fs;
use std::path::Path;

use log::info;
use ndarray::{Array3, Array4, Axis};

use super::affine::Affine;
use super::nifti::{write_volume, Volume};
use crate::config::{Dimension, Resolution};
use crate::error::{PipelineError, Result};
use crate::fetch::{DifumoFiles, Icbm152Files};

/// Edge of the cubic field of view, in mm.
const FIELD_OF_VIEW: f64 = 48.0;
const BLOB_SIGMA: f64 = 5.0;
/// Voxels below this fraction of a blob's peak are left at zero.
const SUPPORT_CUTOFF: f64 = 0.05;

fn gaussian(d2: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-d2 / (2.0 * sigma.powi(2))).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5)).rotate_left(7).wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// One Gaussian blob in world coordinates.
#[derive(Debug, Clone, Copy)]
struct Blob {
    centre: [f64; 3],
    amplitude: f64,
}

/// Odd components get a second blob mirrored along x so they split into
/// two regions.
fn draw_components(n: usize, rng: &mut SimpleRng) -> Vec<Vec<Blob>> {
    let half = FIELD_OF_VIEW / 2.0 - 2.0 * BLOB_SIGMA;
    (0..n)
        .map(|k| {
            let blob = Blob {
                centre: [0, 1, 2].map(|_| rng.uniform(-half, half)),
                amplitude: rng.uniform(0.5, 1.5),
            };
            if k % 2 == 0 {
                return vec![blob];
            }
            let mut left = blob;
            left.centre[0] = -half;
            let mut right = blob;
            right.centre[0] = half;
            vec![left, right]
        })
        .collect()
}

fn grid_affine(voxel_mm: f64) -> Affine {
    let o = -FIELD_OF_VIEW / 2.0;
    Affine::scaling([voxel_mm; 3], [o, o, o])
}

fn grid_len(voxel_mm: f64) -> usize {
    (FIELD_OF_VIEW / voxel_mm).round() as usize
}

fn render_maps(components: &[Vec<Blob>], res: Resolution) -> Volume {
    let voxel_mm = f64::from(res.mm());
    let affine = grid_affine(voxel_mm);
    let n = grid_len(voxel_mm);
    let mut data = Array4::<f32>::zeros((n, n, n, components.len()));
    for (k, mut map) in data.axis_iter_mut(Axis(3)).enumerate() {
        for ((x, y, z), v) in map.indexed_iter_mut() {
            let p = affine.apply([x as f64, y as f64, z as f64]);
            let mut value = 0.0;
            for blob in &components[k] {
                let d2: f64 = (0..3).map(|i| (p[i] - blob.centre[i]).powi(2)).sum();
                let g = gaussian(d2, BLOB_SIGMA, blob.amplitude);
                if g >= SUPPORT_CUTOFF * blob.amplitude {
                    value += g;
                }
            }
            *v = value as f32;
        }
    }
    Volume::new(data, &affine)
}

fn labels_csv(n: usize, rng: &mut SimpleRng) -> String {
    let mut out = String::from("Component,Difumo_names,Yeo_networks7,Yeo_networks17,GM,WM,CSF\n");
    for k in 0..n {
        let gm = rng.uniform(0.4, 0.8);
        let wm = rng.uniform(0.0, 1.0 - gm);
        let csf = 1.0 - gm - wm;
        out.push_str(&format!(
            "{},Synthetic component {},No network found,No network found,{gm:.6},{wm:.6},{csf:.6}\n",
            k + 1,
            k + 1
        ));
    }
    out
}

// ---------------------------------------------------------------------------
// Template tissue maps
// ---------------------------------------------------------------------------

/// Concentric tissue shells on a 1 mm grid: CSF core, WM, then GM.
fn tissue_maps() -> [Volume; 3] {
    let affine = grid_affine(1.0);
    let n = grid_len(1.0);
    let ramp = |r: f64, inner: f64, outer: f64| -> f32 {
        let rise = ((r - inner + 2.0) / 4.0).clamp(0.0, 1.0);
        let fall = ((outer + 2.0 - r) / 4.0).clamp(0.0, 1.0);
        (rise.min(fall)) as f32
    };
    let radius = |x: usize, y: usize, z: usize| -> f64 {
        let p = affine.apply([x as f64, y as f64, z as f64]);
        (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
    };
    let shell = |inner: f64, outer: f64| -> Volume {
        let data =
            Array3::from_shape_fn((n, n, n), |(x, y, z)| ramp(radius(x, y, z), inner, outer));
        Volume::new(data.insert_axis(Axis(3)), &affine)
    };
    [shell(12.0, 22.0), shell(5.0, 12.0), shell(-2.0, 5.0)]
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// What [`write_sample`] put on disk.
#[derive(Debug, Clone)]
pub struct SampleFiles {
    pub atlases: Vec<DifumoFiles>,
    pub template: Icbm152Files,
}

/// Write a `n_components` synthetic atlas for `dim` at every resolution,
/// its dictionary labels and the template tissue maps under `data_dir`.
pub fn write_sample(
    data_dir: &Path,
    dim: Dimension,
    n_components: usize,
    seed: u64,
) -> Result<SampleFiles> {
    if n_components == 0 {
        return Err(PipelineError::Config(
            "a sample atlas needs at least one component".into(),
        ));
    }
    let mut rng = SimpleRng::new(seed);
    let components = draw_components(n_components, &mut rng);

    let mut atlases = Vec::new();
    for res in Resolution::ALL {
        let files = DifumoFiles::under(data_dir, dim, res);
        create_parent(&files.maps)?;
        write_volume(&render_maps(&components, res), &files.maps)?;
        atlases.push(files);
    }
    let labels = &atlases[0].labels;
    fs::write(labels, labels_csv(n_components, &mut rng))
        .map_err(|e| PipelineError::io(labels, e))?;

    let template = Icbm152Files::under(data_dir);
    create_parent(&template.gm)?;
    let [gm, wm, csf] = tissue_maps();
    write_volume(&gm, &template.gm)?;
    write_volume(&wm, &template.wm)?;
    write_volume(&csf, &template.csf)?;

    info!(
        "wrote a {n_components}-component sample atlas for dimension {dim} under {}",
        data_dir.display()
    );
    Ok(SampleFiles { atlases, template })
}

fn create_parent(path: &Path) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))
}
