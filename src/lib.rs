//! Segmentation of the DiFuMo probabilistic atlases into contiguous regions,
//! each annotated with its grey matter / white matter / CSF overlap, plus
//! JPEG reports of the result.

pub mod config;
pub mod data;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod plot;
pub mod regions;
pub mod sparse;
pub mod template;
pub mod version;

pub use error::{PipelineError, Result};
