//! Error types for extraction.

use thiserror::Error;

use crate::ExtractionSummary;

/// Errors raised while resolving, walking or extracting assets.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Cooperative cancellation was observed.
    #[error("Cancelled")]
    Cancelled,

    /// The root asset of a job is not in the archive.
    #[error("root asset not found: {0}")]
    RootNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("archive error: {0}")]
    Archive(#[from] veles_archive::Error),

    #[error("schema error: {0}")]
    Schema(#[from] veles_trinity::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Exporter could not convert an asset.
    #[error("export failed: {0}")]
    Export(String),

    /// A job failed while `continue_on_error` was off. `summary` holds the
    /// results of the whole stopped run.
    #[error("job {job_id} failed: {message}")]
    JobFailed {
        job_id: String,
        message: String,
        summary: Box<ExtractionSummary>,
    },

    /// Another export is still running.
    #[error("an export is already in progress")]
    Busy,

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ExtractError {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExtractError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
