use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time to wait for any inbound traffic before a connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often the server pings connected clients.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(5);

/// Maximum WebSocket message size in bytes (80 MB).
///
/// Must exceed the largest chunk the store accepts plus the frame header.
pub const WS_MAX_MESSAGE_SIZE: usize = 80 * 1024 * 1024;

/// Timeout for JSON request/response operations.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for chunk frames and merge requests.
///
/// Both involve disk I/O proportional to the chunk or file size.
pub const WS_BINARY_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Requests from client to server
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "verify")]
    Verify,
    #[serde(rename = "merge")]
    Merge,

    // Responses from server to client
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "verify_response")]
    VerifyResponse,
    #[serde(rename = "upload_chunk_response")]
    UploadChunkResponse,
    #[serde(rename = "merge_response")]
    MergeResponse,
    #[serde(rename = "error")]
    Error,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common error codes carried in [`crate::WsError`].
pub const WS_ERR_CODE_BAD_REQUEST: i32 = 400;
pub const WS_ERR_CODE_PAYLOAD_TOO_LARGE: i32 = 413;
pub const WS_ERR_CODE_CHECKSUM_MISMATCH: i32 = 422;
pub const WS_ERR_CODE_INTERNAL: i32 = 500;
pub const WS_ERR_CODE_NOT_IMPLEMENTED: i32 = 501;
