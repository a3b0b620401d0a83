/// Data layer: file formats read and written by both pipelines.
///
/// Architecture:
/// ```text
///  maps.nii.gz      labels_{dim}_dictionary.csv
///        │                    │
///        ▼                    ▼
///   ┌──────────┐        ┌──────────┐
///   │  nifti   │        │  labels   │  CSV in, TSV out
///   └──────────┘        └──────────┘
///        │ affine                │
///        ▼                       ▼
///   ┌──────────┐        ┌──────────┐
///   │  affine  │        │ manifest  │  dataset_description.json
///   └──────────┘        └──────────┘
/// ```
///
/// `synthetic` writes a small sample of the raw layout for offline runs.

pub mod affine;
pub mod labels;
pub mod manifest;
pub mod nifti;
pub mod synthetic;
