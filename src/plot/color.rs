use image::Rgb;
use palette::{Hsl, IntoColor, LinSrgb, Mix, Srgb};

pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
pub const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
/// Brain support drawn under the maps, a white background dimmed slightly.
pub const DIMMED: Rgb<u8> = Rgb([229, 229, 229]);

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Rgb<u8>> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            Rgb([
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            ])
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Contour colours: component index → Rgb
// ---------------------------------------------------------------------------

/// How component outlines are coloured on the composite image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContourStyle {
    /// Every outline in black.
    #[default]
    Black,
    /// One palette colour per component.
    Distinct,
}

/// Colour of every component outline.
#[derive(Debug, Clone)]
pub struct ContourColors {
    colors: Vec<Rgb<u8>>,
}

impl ContourColors {
    pub fn new(style: ContourStyle, n_components: usize) -> Self {
        let colors = match style {
            ContourStyle::Black => vec![BLACK; n_components],
            ContourStyle::Distinct => generate_palette(n_components),
        };
        ContourColors { colors }
    }

    pub fn color_for(&self, component: usize) -> Rgb<u8> {
        self.colors.get(component).copied().unwrap_or(BLACK)
    }
}

// ---------------------------------------------------------------------------
// Diverging colour map for stat maps
// ---------------------------------------------------------------------------

fn lin(rgb: [f32; 3]) -> LinSrgb {
    Srgb::new(rgb[0], rgb[1], rgb[2]).into_linear()
}

fn to_rgb(c: LinSrgb) -> Rgb<u8> {
    let s: Srgb<f32> = Srgb::from_linear(c);
    let s: Srgb<u8> = s.into_format();
    Rgb([s.red, s.green, s.blue])
}

/// Cold-hot map of `t ∈ [-1, 1]`: dark red → red → yellow for positive
/// values, dark blue → blue → cyan for negative ones.
pub fn cold_hot(t: f32) -> Rgb<u8> {
    const HOT: [[f32; 3]; 3] = [[0.5, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0]];
    const COLD: [[f32; 3]; 3] = [[0.0, 0.0, 0.5], [0.0, 0.0, 1.0], [0.0, 1.0, 1.0]];
    let stops = if t < 0.0 { &COLD } else { &HOT };
    let x = t.abs().clamp(0.0, 1.0) * 2.0;
    let (lo, factor) = if x < 1.0 { (0, x) } else { (1, x - 1.0) };
    to_rgb(lin(stops[lo]).mix(lin(stops[lo + 1]), factor))
}
