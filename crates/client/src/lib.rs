//! Upload client for chunkdrop servers.
//!
//! [`UploadSession`] drives one file through fingerprinting, verification,
//! chunk transmission and merge over any [`StoreConnection`]; [`WsClient`]
//! is the WebSocket implementation.

pub mod connection;
pub mod error;
mod pumps;
pub mod session;
pub mod types;
pub mod ws_client;

pub use connection::{ConnectionError, ResponseFuture, StoreConnection};
pub use error::UploadError;
pub use session::UploadSession;
pub use types::{DEFAULT_PARALLELISM, UploadEvent, UploadOptions, UploadOutcome, UploadPhase};
pub use ws_client::WsClient;
