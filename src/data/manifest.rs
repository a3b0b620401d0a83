use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::version;

pub const FILE_NAME: &str = "dataset_description.json";

// ---------------------------------------------------------------------------
// BIDS dataset_description.json
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDescription {
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "DatasetType")]
    pub dataset_type: String,
    #[serde(rename = "GeneratedBy")]
    pub generated_by: Vec<GeneratedBy>,
    #[serde(rename = "SourceDatasets")]
    pub source_datasets: Vec<SourceDataset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeneratedBy {
    pub name: String,
    pub version: String,
    #[serde(rename = "CodeURL")]
    pub code_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDataset {
    #[serde(rename = "DOI")]
    pub doi: String,
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Version")]
    pub version: String,
}

impl DatasetDescription {
    /// Provenance of the segmented atlases: DiFuMo and TemplateFlow.
    pub fn segmented_difumo() -> Self {
        DatasetDescription {
            bids_version: "1.6.0".into(),
            name: "Segmented DiFuMo Atlas".into(),
            dataset_type: "derivative".into(),
            generated_by: vec![GeneratedBy {
                name: version::PACKAGE_NAME.into(),
                version: version::version().into(),
                code_url: version::CODE_URL.into(),
            }],
            source_datasets: vec![
                SourceDataset {
                    doi: "10.1016/j.neuroimage.2020.117126.".into(),
                    url: "https://osf.io/k8w5s/".into(),
                    version: "1".into(),
                },
                SourceDataset {
                    doi: "10.1101/2021.02.10.430678".into(),
                    url: "https://www.templateflow.org/".into(),
                    version: "1.4.1".into(),
                },
            ],
        }
    }
}

/// Write `description` as two-space indented JSON.
pub fn write_manifest(description: &DatasetDescription, path: &Path) -> Result<()> {
    let text = serde_json::to_string_pretty(description)
        .map_err(|e| PipelineError::format("manifest", path, e.to_string()))?;
    std::fs::write(path, text).map_err(|e| PipelineError::io(path, e))
}
