//! WebSocket server for chunked uploads.
//!
//! Accepts any number of client connections, dispatches JSON requests and
//! binary chunk frames to a [`Handler`], and manages each connection's
//! lifecycle (ping/pong, graceful shutdown). [`StoreHandler`] serves the
//! requests from a local storage root.

mod connection;
mod handler;
mod server;
mod store_handler;

pub use connection::{ClientConnection, SendError, Sender};
pub use handler::{Handler, HandlerFuture};
pub use server::{DEFAULT_PORT, ServerConfig, UploadServer};
pub use store_handler::StoreHandler;

/// Send buffer capacity per connection.
///
/// Clients keep several chunk frames in flight, each answered by one ack.
pub const SEND_BUFFER_SIZE: usize = 2048;

/// Errors produced by the upload server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("server already running")]
    AlreadyRunning,
}
