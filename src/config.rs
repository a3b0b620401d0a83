use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Template space every DiFuMo atlas is registered to.
pub const TEMPLATE: &str = "MNI152NLin2009cAsym";

/// Sentinel accepted on the command line for "every value".
pub const ALL: i32 = -1;

// ---------------------------------------------------------------------------
// Dimension / resolution
// ---------------------------------------------------------------------------

/// Number of components in a DiFuMo dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Dimension(u16);

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension(64),
        Dimension(128),
        Dimension(256),
        Dimension(512),
        Dimension(1024),
    ];

    pub fn get(self) -> u16 {
        self.0
    }
}

impl TryFrom<i32> for Dimension {
    type Error = PipelineError;

    fn try_from(value: i32) -> Result<Self> {
        Dimension::ALL
            .into_iter()
            .find(|d| i32::from(d.0) == value)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "dimension {value} is not one of {{64, 128, 256, 512, 1024}} (or -1 for all)"
                ))
            })
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Isotropic voxel size of an atlas, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution(u8);

impl Resolution {
    pub const ALL: [Resolution; 2] = [Resolution(2), Resolution(3)];

    pub fn mm(self) -> u8 {
        self.0
    }
}

impl TryFrom<i32> for Resolution {
    type Error = PipelineError;

    fn try_from(value: i32) -> Result<Self> {
        Resolution::ALL
            .into_iter()
            .find(|r| i32::from(r.0) == value)
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "resolution {value} is not one of {{2, 3}} (or -1 for all)"
                ))
            })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Selection of atlases to process
// ---------------------------------------------------------------------------

/// The dimension × resolution cross-product a run iterates over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub dimensions: Vec<Dimension>,
    pub resolutions: Vec<Resolution>,
}

impl Selection {
    /// Build from raw command line integers, `-1` meaning all.
    pub fn resolve(dim: i32, res: i32) -> Result<Self> {
        let dimensions = if dim == ALL {
            Dimension::ALL.to_vec()
        } else {
            vec![Dimension::try_from(dim)?]
        };
        let resolutions = if res == ALL {
            Resolution::ALL.to_vec()
        } else {
            vec![Resolution::try_from(res)?]
        };
        Ok(Selection {
            dimensions,
            resolutions,
        })
    }

    /// Pairs in processing order: dimensions outer, resolutions inner.
    pub fn pairs(&self) -> impl Iterator<Item = (Dimension, Resolution)> + '_ {
        self.dimensions
            .iter()
            .flat_map(|&d| self.resolutions.iter().map(move |&r| (d, r)))
    }
}

impl Default for Selection {
    fn default() -> Self {
        Selection {
            dimensions: Dimension::ALL.to_vec(),
            resolutions: Resolution::ALL.to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Paths and file names
// ---------------------------------------------------------------------------

/// Root of the repository; default locations hang off it.
pub fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn default_input_path() -> PathBuf {
    project_root().join("data").join("raw")
}

pub fn default_output_path() -> PathBuf {
    project_root().join("data").join("processed")
}

/// Directory holding the manifest of the segmented derivative.
pub fn segmented_root(output_path: &Path) -> PathBuf {
    output_path.join("segmented_difumo_atlases")
}

/// Directory holding the per-atlas volumes and label tables.
pub fn template_dir(segmented_root: &Path) -> PathBuf {
    segmented_root.join(format!("tpl-{TEMPLATE}"))
}

/// Shared stem of the `.nii.gz` and `.tsv` written for one atlas.
pub fn segmented_file_root(dim: Dimension, res: Resolution) -> String {
    format!(
        "tpl-{TEMPLATE}_res-{:02}_atlas-DiFuMo_desc-{}dimensionsSegmented_probseg",
        res.mm(),
        dim.get()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus_one_selects_everything() {
        let sel = Selection::resolve(ALL, ALL).unwrap();
        assert_eq!(sel.dimensions.len(), 5);
        assert_eq!(sel.resolutions.len(), 2);
        assert_eq!(sel.pairs().count(), 10);
        assert_eq!(sel, Selection::default());
    }

    #[test]
    fn single_values_are_validated() {
        let sel = Selection::resolve(256, 3).unwrap();
        assert_eq!(sel.dimensions, vec![Dimension(256)]);
        assert_eq!(sel.resolutions, vec![Resolution(3)]);

        assert!(matches!(
            Selection::resolve(100, 2),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            Selection::resolve(64, 1),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn pairs_iterate_dimensions_outer() {
        let sel = Selection::resolve(ALL, ALL).unwrap();
        let pairs: Vec<(u16, u8)> = sel.pairs().map(|(d, r)| (d.get(), r.mm())).collect();
        assert_eq!(&pairs[..3], &[(64, 2), (64, 3), (128, 2)]);
    }

    #[test]
    fn file_root_pads_resolution() {
        let name = segmented_file_root(Dimension(128), Resolution(2));
        assert_eq!(
            name,
            "tpl-MNI152NLin2009cAsym_res-02_atlas-DiFuMo_desc-128dimensionsSegmented_probseg"
        );
    }
}
