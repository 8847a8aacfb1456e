//! Error kinds shared by the catalog, the upload pipeline and the external
//! tool wrappers.

use std::{io, process::ExitStatus};

use thiserror::Error;

/// Failure reported by an external process (`ffprobe`, `yt-dlp`).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("{tool} returned unusable output: {message}")]
    Parse { tool: String, message: String },
}

/// Failure of a catalog operation.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog already holds a record with {field} {value}")]
    Duplicate { field: &'static str, value: String },
    #[error("reading catalog document: {0}")]
    Read(String),
    #[error("writing catalog document: {source}")]
    Write {
        #[source]
        source: io::Error,
    },
}

/// Failure of one upload, tagged by the pipeline step that produced it.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Bad or missing client input.
    #[error("{0}")]
    Validation(String),
    /// Naming, placement or other filesystem failure.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    /// The duration probe failed.
    #[error("{0}")]
    ExternalTool(#[from] ToolError),
    /// The catalog document could not be rewritten.
    #[error("{0}")]
    Persistence(#[from] CatalogError),
}

impl UploadError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Failure of a remote metadata lookup.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Tool(#[from] ToolError),
}
