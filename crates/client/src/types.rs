//! Data types for the upload flow.

use std::fmt;
use std::time::Duration;

use chunkdrop_protocol::MergeStatus;
use chunkdrop_transfer::ChunkPolicy;

/// Default number of chunks in flight at once.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Client-side upload settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_policy: ChunkPolicy,
    /// Maximum number of chunk frames awaiting acknowledgement.
    pub parallelism: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_policy: ChunkPolicy::default(),
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Stage of the pipeline an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Hash,
    Transmit,
    Merge,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadPhase::Hash => "hash",
            UploadPhase::Transmit => "transmit",
            UploadPhase::Merge => "merge",
        })
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Fingerprinting progress.
    Hashing { bytes_hashed: u64, total_bytes: u64 },
    /// Fingerprint computed.
    Hashed { fingerprint: String },
    /// Server state compared against the local layout.
    Planned {
        total_chunks: u64,
        to_send: u64,
        skip: bool,
    },
    /// One chunk acknowledged by the server.
    ChunkSent {
        index: u64,
        bytes_done: u64,
        total_bytes: u64,
        bytes_per_second: f64,
        eta: Option<Duration>,
    },
    /// Merge requested.
    Merging,
    /// Artifact stored on the server.
    Completed { path: String, instant: bool },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub fingerprint: String,
    /// Artifact name relative to the server's storage root.
    pub path: String,
    /// Chunks transmitted by this run.
    pub chunks_sent: u64,
    /// The server already had the file; nothing was sent.
    pub instant: bool,
    /// Merge status reported by the server (`None` when `instant`).
    pub merge_status: Option<MergeStatus>,
}
