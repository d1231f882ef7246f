//! Client connection management: read/write pumps, keepalive, send buffering.

use std::net::SocketAddr;
use std::sync::Arc;

use chunkdrop_protocol::constants::{
    MessageType, WS_ERR_CODE_BAD_REQUEST, WS_ERR_CODE_NOT_IMPLEMENTED, WS_PING_PERIOD,
    WS_PONG_WAIT,
};
use chunkdrop_protocol::{Message, chunk_frame_request_id, decode_chunk_frame};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::SEND_BUFFER_SIZE;
use crate::handler::Handler;

/// Handle for sending messages to one connected client.
///
/// Cloneable and cheap; wraps an `mpsc::Sender`.
#[derive(Clone)]
pub struct Sender {
    tx: mpsc::Sender<WsMessage>,
}

impl Sender {
    /// Sends a protocol [`Message`] as JSON text.
    ///
    /// Returns `Err` if the buffer is full or the client is gone.
    pub fn send_msg(&self, msg: Message) -> Result<(), SendError> {
        let json = serde_json::to_string(&msg).map_err(|_| SendError)?;
        self.tx.try_send(WsMessage::Text(json.into())).map_err(|_| {
            tracing::warn!("send buffer full or closed, dropping message");
            SendError
        })
    }

    /// Sends an error response for the given request message.
    pub fn send_error(&self, req: &Message, code: i32, message: &str) -> Result<(), SendError> {
        self.send_msg(req.reply_error(code, message))
    }

    /// Returns `true` if the send channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    #[cfg(test)]
    pub(crate) fn channel(capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

/// Error returned when the send channel is full or closed.
#[derive(Debug, thiserror::Error)]
#[error("send failed: buffer full or connection closed")]
pub struct SendError;

/// Active connection to one client.
///
/// Owns the read/write pump tasks through its cancel token.
pub struct ClientConnection {
    pub remote_addr: SocketAddr,
    sender: Sender,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Returns a cloneable [`Sender`] for this connection.
    pub fn sender(&self) -> Sender {
        self.sender.clone()
    }

    /// Signals the pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Resolves once the connection has stopped.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Starts the read and write pumps for a WebSocket connection.
///
/// The pumps run as background tasks and stop when the peer goes away or
/// `server_cancel` fires.
pub fn spawn_connection<S, H>(
    ws_stream: S,
    remote_addr: SocketAddr,
    handler: Arc<H>,
    server_cancel: CancellationToken,
) -> ClientConnection
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error>
        + Send
        + 'static,
    H: Handler,
{
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let sender = Sender { tx };

    let conn = ClientConnection {
        remote_addr,
        sender: sender.clone(),
        cancel: cancel.clone(),
    };

    let (ws_sink, ws_stream) = ws_stream.split();

    tokio::spawn(write_pump(ws_sink, rx, cancel.clone()));

    tokio::spawn(async move {
        read_pump(ws_stream, sender, Arc::clone(&handler), cancel.clone()).await;
        cancel.cancel();
        handler.on_client_disconnected().await;
        tracing::info!(%remote_addr, "client disconnected");
    });

    conn
}

/// Write pump: drains the send channel and sends WS pings.
async fn write_pump<S>(mut sink: S, mut rx: mpsc::Receiver<WsMessage>, cancel: CancellationToken)
where
    S: futures_util::Sink<WsMessage, Error = tokio_tungstenite::tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = rx.recv() => {
                match msg {
                    Some(ws_msg) => {
                        if let Err(e) = sink.send(ws_msg).await {
                            tracing::error!("write pump send error: {e}");
                            break;
                        }
                    }
                    None => break,
                }
            }

            _ = ping_interval.tick() => {
                if let Err(e) = sink.send(WsMessage::Ping(Vec::new().into())).await {
                    tracing::error!("write pump ping error: {e}");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}

/// Read pump: reads WS frames and hands each request to its own task.
///
/// The connection is dropped after [`WS_PONG_WAIT`] without any inbound frame.
async fn read_pump<S, H>(mut stream: S, sender: Sender, handler: Arc<H>, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Send
        + Unpin,
    H: Handler,
{
    let idle = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = &mut idle => {
                tracing::warn!("no traffic within {:?}, closing connection", WS_PONG_WAIT);
                break;
            }

            frame = stream.next() => {
                let ws_msg = match frame {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        tracing::error!("read pump error: {e}");
                        break;
                    }
                    None => break,
                };
                idle.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                match ws_msg {
                    WsMessage::Text(text) => dispatch_text(&handler, &sender, &text),
                    WsMessage::Binary(data) => dispatch_binary(&handler, &sender, &data),
                    WsMessage::Close(_) => {
                        tracing::info!("received close frame");
                        break;
                    }
                    // Pings are answered by tungstenite; pongs only refresh the idle timer.
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
                }
            }
        }
    }
}

/// Routes a JSON request to the matching handler method.
fn dispatch_text<H: Handler>(handler: &Arc<H>, sender: &Sender, text: &str) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("invalid message JSON: {e}");
            return;
        }
    };

    let handler = Arc::clone(handler);
    let s = sender.clone();
    tokio::spawn(async move {
        match msg.msg_type {
            MessageType::Ping => handler.on_ping(s, msg).await,
            MessageType::Verify => handler.on_verify(s, msg).await,
            MessageType::Merge => handler.on_merge(s, msg).await,
            _ => {
                tracing::warn!(msg_type = ?msg.msg_type, "unhandled message type");
                let _ = s.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "unknown message type");
            }
        }
    });
}

/// Decodes a chunk frame and hands it to the handler on its own task.
fn dispatch_binary<H: Handler>(handler: &Arc<H>, sender: &Sender, data: &[u8]) {
    let (header, payload) = match decode_chunk_frame(data) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!("failed to parse chunk frame: {e}");
            if let Some(id) = chunk_frame_request_id(data) {
                let reason = format!("invalid chunk frame: {e}");
                let reply = Message::error(id, WS_ERR_CODE_BAD_REQUEST, reason);
                let _ = sender.send_msg(reply);
            }
            return;
        }
    };

    let payload = payload.to_vec();
    let handler = Arc::clone(handler);
    let s = sender.clone();
    tokio::spawn(async move {
        handler.on_chunk_frame(s, header, payload).await;
    });
}
