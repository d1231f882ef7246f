use serde::{Deserialize, Serialize};

use crate::types::{ChunkKey, MergeStatus};

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Asks whether a file is already stored and, if not, which chunks are.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub fingerprint: String,
    pub filename: String,
}

/// Asks the server to assemble the staged chunks of a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub fingerprint: String,
    pub filename: String,
    pub chunk_size: u64,
    pub total_size: u64,
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Answer to a [`VerifyRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub already_complete: bool,
    /// Chunk keys already staged. Empty when `already_complete` is set.
    #[serde(default)]
    pub stored_chunk_keys: Vec<ChunkKey>,
}

/// Acknowledges a stored chunk frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkResponse {
    pub chunk_key: ChunkKey,
    /// Set when the final artifact already existed and the chunk was dropped.
    #[serde(default)]
    pub already_complete: bool,
}

/// Answer to a [`MergeRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub status: MergeStatus,
    /// Final artifact name relative to the storage root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<u64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl MergeResponse {
    /// A response carrying only a status and an explanatory message.
    pub fn with_status(status: MergeStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            path: String::new(),
            expected: None,
            missing: Vec::new(),
            message: message.into(),
        }
    }
}
