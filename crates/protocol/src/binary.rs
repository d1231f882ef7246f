//! Chunk frame codec: 4-byte big-endian header length + JSON header + raw payload.

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::types::ChunkKey;

/// Header of a binary chunk frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFrameHeader {
    /// Request id echoed in the response envelope.
    pub id: String,
    pub fingerprint: String,
    pub chunk_key: ChunkKey,
    pub filename: String,
    /// Lowercase hex SHA-256 of the payload (empty means no verification).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Only the request id of a header.
#[derive(Deserialize)]
struct FrameId {
    id: String,
}

/// Splits a raw binary frame into its header and payload.
///
/// Wire format: `[4 bytes: header_len (big-endian)][header_len bytes: JSON][rest: payload]`
pub fn decode_chunk_frame(data: &[u8]) -> Result<(ChunkFrameHeader, &[u8]), ProtocolError> {
    if data.len() < 4 {
        return Err(ProtocolError::FrameTooShort);
    }

    let header_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let body = &data[4..];
    if body.len() < header_len {
        return Err(ProtocolError::HeaderTruncated {
            expected: header_len,
            got: body.len(),
        });
    }

    let (header_bytes, payload) = body.split_at(header_len);
    let header: ChunkFrameHeader = serde_json::from_slice(header_bytes)?;
    Ok((header, payload))
}

/// Recovers the request id of a frame whose header does not decode.
///
/// Returns `None` unless the header is a JSON object with a non-empty `id`.
pub fn chunk_frame_request_id(data: &[u8]) -> Option<String> {
    let len_bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    let header_len = u32::from_be_bytes(len_bytes) as usize;
    let header = data.get(4..4usize.checked_add(header_len)?)?;
    let FrameId { id } = serde_json::from_slice(header).ok()?;
    (!id.is_empty()).then_some(id)
}

/// Encodes a chunk frame for sending as one binary WebSocket message.
pub fn encode_chunk_frame(
    header: &ChunkFrameHeader,
    payload: &[u8],
) -> Result<Vec<u8>, serde_json::Error> {
    let header_json = serde_json::to_vec(header)?;
    let header_len = header_json.len() as u32;

    let mut buf = Vec::with_capacity(4 + header_json.len() + payload.len());
    buf.extend_from_slice(&header_len.to_be_bytes());
    buf.extend_from_slice(&header_json);
    buf.extend_from_slice(payload);
    Ok(buf)
}
