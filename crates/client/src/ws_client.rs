//! WebSocket client for an upload server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use chunkdrop_protocol::constants::{
    WS_BINARY_REQUEST_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT,
};
use chunkdrop_protocol::{ChunkFrameHeader, Message, MessageType, encode_chunk_frame};

use crate::connection::{ConnectionError, ResponseFuture, StoreConnection, check_response};

/// Requests awaiting a response, keyed by message id.
pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

const WRITE_BUFFER: usize = 256;

/// Connection to one upload server.
///
/// Requests may be issued concurrently; responses are matched by id.
pub struct WsClient {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    read_handle: JoinHandle<()>,
    write_handle: JoinHandle<()>,
    ping_handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WsClient {
    /// Connects to `url` (e.g. `ws://host:9999`).
    pub async fn connect(url: &str) -> Result<Self, ConnectionError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, read) = ws_stream.split();
        tracing::debug!(url, "connected to upload server");

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WRITE_BUFFER);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = tokio::spawn(crate::pumps::write::write_pump(
            write,
            write_rx,
            cancel.clone(),
        ));
        let read_handle = tokio::spawn(crate::pumps::read::read_pump(
            read,
            pending.clone(),
            write_tx.clone(),
            cancel.clone(),
        ));
        let ping_handle = tokio::spawn(crate::pumps::ping::ping_pump(
            write_tx.clone(),
            cancel.clone(),
        ));

        Ok(Self {
            write_tx,
            pending,
            read_handle,
            write_handle,
            ping_handle,
            cancel,
        })
    }

    /// Sends a JSON request and waits for its response.
    ///
    /// Merge requests get the longer binary timeout since assembling a large
    /// file may take a while.
    pub async fn request<T: serde::Serialize>(
        &self,
        msg_type: MessageType,
        payload: Option<&T>,
    ) -> Result<Message, ConnectionError> {
        let timeout = if msg_type == MessageType::Merge {
            WS_BINARY_REQUEST_TIMEOUT
        } else {
            WS_REQUEST_TIMEOUT
        };
        let id = uuid::Uuid::new_v4().to_string();
        let msg = Message::new(&id, msg_type, payload)?;
        let json = serde_json::to_string(&msg)?;
        self.round_trip(id, tungstenite::Message::Text(json.into()), timeout)
            .await
    }

    /// Sends one chunk frame and waits for its acknowledgement.
    ///
    /// A fresh id replaces `header.id`.
    pub async fn send_chunk_frame(
        &self,
        mut header: ChunkFrameHeader,
        data: &[u8],
    ) -> Result<Message, ConnectionError> {
        let id = uuid::Uuid::new_v4().to_string();
        header.id = id.clone();
        let frame = encode_chunk_frame(&header, data)?;
        self.round_trip(
            id,
            tungstenite::Message::Binary(frame.into()),
            WS_BINARY_REQUEST_TIMEOUT,
        )
        .await
    }

    async fn round_trip(
        &self,
        id: String,
        frame: tungstenite::Message,
        timeout: Duration,
    ) -> Result<Message, ConnectionError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The read pump cancels before clearing `pending`.
        if self.cancel.is_cancelled() || self.write_tx.send(frame).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(ConnectionError::Closed);
        }

        let result = tokio::time::timeout(timeout, rx).await;
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => check_response(resp),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    /// Returns `true` while the pumps are running.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Gracefully closes the connection.
    pub async fn close(&self) {
        self.cancel.cancel();
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
    }
}

impl StoreConnection for WsClient {
    fn send_request(
        &self,
        msg_type: MessageType,
        payload: serde_json::Value,
    ) -> ResponseFuture<'_> {
        Box::pin(async move { self.request(msg_type, Some(&payload)).await })
    }

    fn send_chunk(&self, header: ChunkFrameHeader, data: Vec<u8>) -> ResponseFuture<'_> {
        Box::pin(async move { self.send_chunk_frame(header, &data).await })
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.read_handle.abort();
        self.write_handle.abort();
        self.ping_handle.abort();
    }
}
