//! Client side of chunked uploads: splitting a file into chunks,
//! fingerprinting it incrementally off the caller's thread, and deciding
//! which chunks still have to be sent.

mod chunker;
mod hasher;
mod planner;
mod rate;

pub use chunker::{Chunk, ChunkLayout, ChunkPolicy, ChunkReader, checksum_bytes, split};
pub use hasher::{HashEvent, HashWorker, IncrementalHasher, fingerprint_bytes, fingerprint_file};
pub use planner::{UploadPlan, UploadPlanner};
pub use rate::TransferRate;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default upper bound on the number of chunks per file.
///
/// Larger files get proportionally larger chunks (see [`ChunkPolicy`]).
pub const DEFAULT_MAX_CHUNK_COUNT: u64 = 10_000;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("read failed at chunk {index}: {source}")]
    Read {
        index: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid chunk size: {0}")]
    InvalidChunkSize(u64),

    #[error("chunk index {index} out of range ({count} chunks)")]
    IndexOutOfRange { index: u64, count: u64 },

    #[error("hashing cancelled")]
    Cancelled,

    #[error("hash worker stopped without a result")]
    WorkerStopped,
}
