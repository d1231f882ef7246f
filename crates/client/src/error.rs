//! Upload error types.

use chunkdrop_transfer::TransferError;

use crate::connection::ConnectionError;
use crate::types::UploadPhase;

/// Errors produced during an upload.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hashing failed: {0}")]
    Hash(#[source] TransferError),

    #[error("reading chunk failed: {0}")]
    ChunkRead(#[source] TransferError),

    #[error("transport error: {0}")]
    Transmit(#[from] ConnectionError),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("server has no staged chunks: {0}")]
    StagingMissing(String),

    #[error("incomplete chunks: expected {expected}, missing {missing:?}")]
    IncompleteChunks { expected: u64, missing: Vec<u64> },

    #[error("server discarded staged chunks: {0}")]
    StagingDiscarded(String),

    #[error("merge failed: {0}")]
    Merge(String),

    #[error("cancelled")]
    Cancelled,
}

impl UploadError {
    /// Pipeline stage the error occurred in.
    pub fn phase(&self) -> UploadPhase {
        match self {
            UploadError::Hash(_) => UploadPhase::Hash,
            UploadError::StagingMissing(_)
            | UploadError::IncompleteChunks { .. }
            | UploadError::StagingDiscarded(_)
            | UploadError::Merge(_) => UploadPhase::Merge,
            UploadError::Io(_)
            | UploadError::Json(_)
            | UploadError::ChunkRead(_)
            | UploadError::Transmit(_)
            | UploadError::UnexpectedResponse(_)
            | UploadError::Cancelled => UploadPhase::Transmit,
        }
    }

    /// Whether re-running the upload can make progress (it resumes from
    /// the chunks already stored).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Transmit(_)
                | UploadError::IncompleteChunks { .. }
                | UploadError::StagingMissing(_)
                | UploadError::StagingDiscarded(_)
                | UploadError::Cancelled
        )
    }
}
