//! Server side of chunked uploads: chunk staging, resumption queries and
//! assembly of the final artifact.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/<fingerprint><extension>                       final artifact
//! <root>/.staging/<fingerprint>/<fingerprint>-<index>   staged chunk
//! ```

mod chunk_store;
mod merger;
mod paths;
mod service;
mod validation;

use std::path::PathBuf;

use chunkdrop_protocol::constants::{
    WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_CHECKSUM_MISMATCH, WS_ERR_CODE_INTERNAL,
    WS_ERR_CODE_PAYLOAD_TOO_LARGE,
};

pub use chunk_store::{ChunkStore, PutOutcome};
pub use merger::{MergeOutcome, Merger};
pub use paths::StoragePaths;
pub use service::UploadService;
pub use validation::{validate_chunk_key, validate_extension, validate_fingerprint};

/// Default upper bound for a single chunk payload: 64 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Storage configuration shared by [`ChunkStore`], [`Merger`] and [`UploadService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub root: PathBuf,
    pub max_chunk_size: u64,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

/// Errors produced by the store crate.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("chunk key {key} does not belong to fingerprint {fingerprint}")]
    FingerprintMismatch { fingerprint: String, key: String },

    #[error("chunk of {size} bytes exceeds limit of {limit}")]
    ChunkTooLarge { size: u64, limit: u64 },

    #[error("checksum mismatch for chunk {key}")]
    ChecksumMismatch { key: String },

    #[error("no staged chunks for {0}")]
    StagingMissing(String),

    #[error("incomplete chunks: expected {expected}, missing {missing:?}")]
    IncompleteChunks { expected: u64, missing: Vec<u64> },

    #[error("unexpected chunk index {index} (expected {expected} chunks)")]
    UnexpectedChunk { index: u64, expected: u64 },

    #[error("chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch {
        index: u64,
        expected: u64,
        actual: u64,
    },

    #[error("staged chunks discarded: {0}")]
    StagingDiscarded(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    /// Error code reported to clients in an error envelope.
    pub fn code(&self) -> i32 {
        match self {
            StoreError::InvalidName(_)
            | StoreError::FingerprintMismatch { .. }
            | StoreError::UnexpectedChunk { .. }
            | StoreError::InvalidRequest(_) => WS_ERR_CODE_BAD_REQUEST,
            StoreError::ChunkTooLarge { .. } => WS_ERR_CODE_PAYLOAD_TOO_LARGE,
            StoreError::ChecksumMismatch { .. } => WS_ERR_CODE_CHECKSUM_MISMATCH,
            StoreError::Io(_)
            | StoreError::StagingMissing(_)
            | StoreError::IncompleteChunks { .. }
            | StoreError::ChunkSizeMismatch { .. }
            | StoreError::StagingDiscarded(_) => WS_ERR_CODE_INTERNAL,
        }
    }
}

/// Runs blocking file work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
}
