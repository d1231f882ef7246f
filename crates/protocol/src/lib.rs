//! Wire protocol for chunked, resumable uploads.
//!
//! JSON requests travel inside a [`Message`] envelope; chunk payloads travel
//! as binary frames (see [`binary`]).

pub mod binary;
pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use binary::{
    ChunkFrameHeader, chunk_frame_request_id, decode_chunk_frame, encode_chunk_frame,
};
pub use constants::MessageType;
pub use envelope::{Message, WsError};
pub use types::{
    ChunkKey, MergeStatus, extract_extension, is_safe_extension, storage_extension,
};

/// Errors produced while parsing protocol data.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame too short (need at least 4 bytes)")]
    FrameTooShort,

    #[error("frame header truncated: expected {expected} bytes, got {got}")]
    HeaderTruncated { expected: usize, got: usize },

    #[error("invalid chunk key: {0}")]
    InvalidChunkKey(String),
}
