//! Transport seam between the upload pipeline and the server.

use std::future::Future;
use std::pin::Pin;

use chunkdrop_protocol::{ChunkFrameHeader, Message, MessageType};
use tokio_tungstenite::tungstenite;

/// Errors from the client transport.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("server error {code}: {message}")]
    Server { code: i32, message: String },
}

/// Boxed future returned by [`StoreConnection`] methods.
pub type ResponseFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Message, ConnectionError>> + Send + 'a>>;

/// Request/response channel to an upload server.
///
/// Implementations correlate each request with its response and turn error
/// envelopes into [`ConnectionError::Server`].
pub trait StoreConnection: Send + Sync {
    /// Sends a JSON request and waits for the response.
    fn send_request(&self, msg_type: MessageType, payload: serde_json::Value)
    -> ResponseFuture<'_>;

    /// Sends one chunk frame and waits for its acknowledgement.
    ///
    /// The implementation owns `header.id`.
    fn send_chunk(&self, header: ChunkFrameHeader, data: Vec<u8>) -> ResponseFuture<'_>;
}

/// Maps an error envelope to [`ConnectionError::Server`].
pub(crate) fn check_response(resp: Message) -> Result<Message, ConnectionError> {
    match &resp.error {
        Some(err) => Err(ConnectionError::Server {
            code: err.code,
            message: err.message.clone(),
        }),
        None => Ok(resp),
    }
}
