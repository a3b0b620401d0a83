use std::path::{Path, PathBuf};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error taxonomy shared by both pipelines
// ---------------------------------------------------------------------------

/// Everything that can stop a segmentation or rendering run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid dimension / resolution / threshold arguments.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A file could not be read, created or written.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Network or remote data store failure.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// File content that does not parse as the expected format.
    #[error("malformed {kind} file {}: {reason}", path.display())]
    Format {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// Geometry disagreement between volumes, masks or ratio matrices.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// Image encoding or saving failure.
    #[error("failed to render {}: {source}", path.display())]
    Render {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn format(kind: &'static str, path: &Path, reason: impl Into<String>) -> Self {
        PipelineError::Format {
            kind,
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }

    pub fn fetch(url: &str, reason: impl ToString) -> Self {
        PipelineError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    /// `true` when the underlying cause is a missing file.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            PipelineError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound
        )
    }
}
