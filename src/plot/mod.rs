/// Visualization of segmented atlases.
///
/// ```text
///  segmented .nii.gz + .tsv
///        │
///        ▼
///   ┌──────────┐
///   │ display  │  per atlas: thresholds, cut points, file layout
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  render  │  three orthogonal slices → RgbImage
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  color   │  cold-hot map, contour palette
///   └──────────┘
/// ```

pub mod color;
pub mod display;
pub mod render;

pub use display::{plot_atlases_image, DisplayConfig, DisplayOutput, DisplaySummary};
