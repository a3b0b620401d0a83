//! Orthogonal-slice rendering: sagittal, coronal and axial panels side by
//! side, superior/anterior up, one voxel drawn as a `zoom × zoom` block.

use image::{Rgb, RgbImage};
use ndarray::{Array3, Array4, ArrayView3, Axis};

use super::color::{cold_hot, ContourColors, DIMMED, WHITE};
use crate::regions::largest_component;

/// Values at or below this magnitude are transparent on stat maps.
const STAT_THRESHOLD: f32 = 1e-6;
const CUT_PERCENTILE: f64 = 80.0;

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Sagittal,
    Coronal,
    Axial,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Sagittal,
        Orientation::Coronal,
        Orientation::Axial,
    ];

    /// (horizontal, vertical) extent of the slice in voxels.
    fn plane(self, shape: [usize; 3]) -> (usize, usize) {
        match self {
            Orientation::Sagittal => (shape[1], shape[2]),
            Orientation::Coronal => (shape[0], shape[2]),
            Orientation::Axial => (shape[0], shape[1]),
        }
    }

    fn voxel(self, cut: [usize; 3], u: usize, v: usize) -> [usize; 3] {
        match self {
            Orientation::Sagittal => [cut[0], u, v],
            Orientation::Coronal => [u, cut[1], v],
            Orientation::Axial => [u, v, cut[2]],
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Panel {
    orientation: Orientation,
    x0: u32,
    width: usize,
    height: usize,
}

/// Placement of the three panels on a canvas.
#[derive(Debug, Clone)]
pub struct OrthoLayout {
    shape: [usize; 3],
    zoom: u32,
    panels: Vec<Panel>,
    size: (u32, u32),
}

impl OrthoLayout {
    pub fn new(shape: [usize; 3], zoom: u32) -> Self {
        let zoom = zoom.max(1);
        let gap = 2 * zoom;
        let mut panels = Vec::with_capacity(3);
        let mut x0 = 0;
        let mut height = 0;
        for orientation in Orientation::ALL {
            let (w, h) = orientation.plane(shape);
            panels.push(Panel {
                orientation,
                x0,
                width: w,
                height: h,
            });
            x0 += w as u32 * zoom + gap;
            height = height.max(h as u32 * zoom);
        }
        OrthoLayout {
            shape,
            zoom,
            panels,
            size: (x0.saturating_sub(gap).max(1), height.max(1)),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn blank(&self) -> RgbImage {
        RgbImage::from_pixel(self.size.0, self.size.1, WHITE)
    }

    /// Voxel under pixel `(px, py)` of `panel`, `None` outside it.
    fn voxel_at(&self, panel: &Panel, cut: [usize; 3], px: i64, py: i64) -> Option<[usize; 3]> {
        let zoom = i64::from(self.zoom);
        if px < 0 || py < 0 {
            return None;
        }
        let (u, row) = ((px / zoom) as usize, (py / zoom) as usize);
        if u >= panel.width || row >= panel.height {
            return None;
        }
        Some(panel.orientation.voxel(cut, u, panel.height - 1 - row))
    }

    /// Colour every panel pixel whose voxel gets `Some` colour from `shade`.
    fn paint<F>(&self, canvas: &mut RgbImage, cut: [usize; 3], mut shade: F)
    where
        F: FnMut([usize; 3]) -> Option<Rgb<u8>>,
    {
        let zoom = self.zoom as usize;
        for panel in &self.panels {
            for py in 0..panel.height * zoom {
                for px in 0..panel.width * zoom {
                    let Some(voxel) = self.voxel_at(panel, cut, px as i64, py as i64) else {
                        continue;
                    };
                    if let Some(color) = shade(voxel) {
                        canvas.put_pixel(panel.x0 + px as u32, py as u32, color);
                    }
                }
            }
        }
    }

    /// Draw the one-pixel outline of the voxels for which `inside` holds.
    fn outline<F>(&self, canvas: &mut RgbImage, cut: [usize; 3], inside: F, color: Rgb<u8>)
    where
        F: Fn([usize; 3]) -> bool,
    {
        let zoom = self.zoom as usize;
        for panel in &self.panels {
            for py in 0..panel.height * zoom {
                for px in 0..panel.width * zoom {
                    let (x, y) = (px as i64, py as i64);
                    let on = |dx: i64, dy: i64| {
                        self.voxel_at(panel, cut, x + dx, y + dy)
                            .is_some_and(|v| inside(v))
                    };
                    if on(0, 0) && !(on(-1, 0) && on(1, 0) && on(0, -1) && on(0, 1)) {
                        canvas.put_pixel(panel.x0 + px as u32, py as u32, color);
                    }
                }
            }
        }
    }

    fn check_cut(&self, cut: [usize; 3]) -> [usize; 3] {
        let mut c = cut;
        for i in 0..3 {
            c[i] = c[i].min(self.shape[i].saturating_sub(1));
        }
        c
    }
}

// ---------------------------------------------------------------------------
// Cut coordinates
// ---------------------------------------------------------------------------

fn percentile(sorted: &[f32], q: f64) -> f32 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let frac = (pos - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Voxel the three slices of a stat map should cross.
///
/// Centre of mass of the largest blob above the 80th percentile of the
/// non-zero |values|, snapped to the nearest voxel of that blob. Empty maps
/// are cut through the middle.
pub fn find_xyz_cut_coords(map: ArrayView3<'_, f32>) -> [usize; 3] {
    let (nx, ny, nz) = map.dim();
    let centre = [nx / 2, ny / 2, nz / 2];

    let abs = map.mapv(|v| if v.is_nan() { 0.0 } else { v.abs() });
    let mut non_zero: Vec<f32> = abs.iter().copied().filter(|&v| v > 0.0).collect();
    if non_zero.is_empty() {
        return centre;
    }
    non_zero.sort_unstable_by(f32::total_cmp);
    let activation = percentile(&non_zero, CUT_PERCENTILE);

    let blob = largest_component(abs.mapv(|v| v >= activation).view());
    let mut weight = 0.0f64;
    let mut sum = [0.0f64; 3];
    for ((x, y, z), &inside) in blob.indexed_iter() {
        if inside {
            let w = f64::from(abs[[x, y, z]]);
            weight += w;
            sum[0] += w * x as f64;
            sum[1] += w * y as f64;
            sum[2] += w * z as f64;
        }
    }
    if weight <= 0.0 {
        return centre;
    }
    let com = sum.map(|s| s / weight);

    let mut best = centre;
    let mut best_d2 = f64::INFINITY;
    for ((x, y, z), &inside) in blob.indexed_iter() {
        if !inside {
            continue;
        }
        let d2 = (x as f64 - com[0]).powi(2)
            + (y as f64 - com[1]).powi(2)
            + (z as f64 - com[2]).powi(2);
        if d2 < best_d2 {
            best_d2 = d2;
            best = [x, y, z];
        }
    }
    best
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// Voxels where any component is non-zero.
pub fn support_mask(maps: &Array4<f32>) -> Array3<bool> {
    maps.map_axis(Axis(3), |lane| lane.iter().any(|&v| v != 0.0 && !v.is_nan()))
}

/// Cut point for the composite: cuts of the voxel-wise maximum over components.
pub fn composite_cut_coords(maps: &Array4<f32>) -> [usize; 3] {
    let peak = maps.map_axis(Axis(3), |lane| {
        lane.iter().fold(0.0f32, |acc, &v| if v.abs() > acc { v.abs() } else { acc })
    });
    find_xyz_cut_coords(peak.view())
}

/// One component on the dimmed brain support, cold-hot coloured.
pub fn render_stat_map(
    map: ArrayView3<'_, f32>,
    support: ArrayView3<'_, bool>,
    cut: [usize; 3],
    zoom: u32,
) -> RgbImage {
    let shape = {
        let (x, y, z) = map.dim();
        [x, y, z]
    };
    let layout = OrthoLayout::new(shape, zoom);
    let cut = layout.check_cut(cut);
    let vmax = map.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()));
    let mut canvas = layout.blank();
    layout.paint(&mut canvas, cut, |voxel| {
        let v = map[voxel];
        if vmax > 0.0 && v.abs() > STAT_THRESHOLD {
            Some(cold_hot(v / vmax))
        } else if support[voxel] {
            Some(DIMMED)
        } else {
            None
        }
    });
    canvas
}

/// Outlines of every component above its threshold on the dimmed support.
///
/// Without thresholds, outlines enclose all non-zero voxels.
pub fn render_prob_atlas(
    maps: &Array4<f32>,
    thresholds: Option<&[f32]>,
    cut: [usize; 3],
    zoom: u32,
    colors: &ContourColors,
) -> RgbImage {
    let s = maps.shape();
    let layout = OrthoLayout::new([s[0], s[1], s[2]], zoom);
    let cut = layout.check_cut(cut);
    let support = support_mask(maps);
    let mut canvas = layout.blank();
    layout.paint(&mut canvas, cut, |voxel| support[voxel].then_some(DIMMED));

    for (k, component) in maps.axis_iter(Axis(3)).enumerate() {
        let threshold = thresholds.and_then(|t| t.get(k).copied()).unwrap_or(0.0);
        layout.outline(
            &mut canvas,
            cut,
            |voxel| component[voxel] > threshold,
            colors.color_for(k),
        );
    }
    canvas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::color::{ContourStyle, BLACK};

    fn cube_map() -> Array3<f32> {
        let mut m = Array3::<f32>::zeros((10, 8, 6));
        for x in 5..8 {
            for y in 2..5 {
                for z in 1..4 {
                    m[[x, y, z]] = 1.0;
                }
            }
        }
        // a stray weak voxel far away
        m[[0, 0, 0]] = 0.1;
        m
    }

    #[test]
    fn layout_puts_panels_side_by_side() {
        let layout = OrthoLayout::new([10, 8, 6], 2);
        // sagittal 8 + coronal 10 + axial 10 voxels, two gaps of 4 px
        assert_eq!(layout.size(), ((8 + 10 + 10) * 2 + 8, 8 * 2));
    }

    #[test]
    fn cut_coords_land_in_the_strongest_blob() {
        let cut = find_xyz_cut_coords(cube_map().view());
        assert_eq!(cut, [6, 3, 2]);
        assert_eq!(find_xyz_cut_coords(Array3::<f32>::zeros((4, 4, 4)).view()), [2, 2, 2]);
    }

    #[test]
    fn stat_map_colours_active_voxels_only() {
        let map = cube_map();
        let support = map.mapv(|v| v != 0.0);
        let img = render_stat_map(map.view(), support.view(), [6, 3, 2], 1);
        let layout = OrthoLayout::new([10, 8, 6], 1);
        assert_eq!(img.dimensions(), layout.size());
        // sagittal panel: u = y, row = 5 - z ; voxel (6, 3, 2) is active
        assert_eq!(*img.get_pixel(3, 3), cold_hot(1.0));
        // voxel (6, 0, 0) is empty background
        assert_eq!(*img.get_pixel(0, 5), WHITE);
    }

    #[test]
    fn prob_atlas_outlines_components() {
        let map = cube_map();
        let maps = map.insert_axis(Axis(3));
        let colors = ContourColors::new(ContourStyle::Black, 1);
        let img = render_prob_atlas(&maps, Some(&[0.5][..]), [6, 3, 2], 3, &colors);
        // axial panel starts after sagittal (8·3) and coronal (10·3) plus two 6 px gaps
        let x0 = 8 * 3 + 6 + 10 * 3 + 6;
        // voxel (5, 2) of the axial slice: its top-left pixel is on the edge
        let (px, py) = (x0 + 5 * 3, (8 - 1 - 2) * 3);
        assert_eq!(*img.get_pixel(px as u32, py as u32 + 2), BLACK);
        // voxel (6, 3) is interior: its centre pixel is the dimmed support
        let (cx, cy) = (x0 + 6 * 3 + 1, (8 - 1 - 3) * 3 + 1);
        assert_eq!(*img.get_pixel(cx as u32, cy as u32), DIMMED);
    }
}
