//! WebSocket read pump: routes responses to waiting requests.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use chunkdrop_protocol::constants::WS_PONG_WAIT;
use chunkdrop_protocol::envelope::Message;

use crate::ws_client::PendingMap;

/// Reads frames until the peer goes away, answering pings and completing
/// pending requests by id.
///
/// Any inbound frame resets the [`WS_PONG_WAIT`] deadline. On exit every
/// still-pending request is dropped so its caller sees the connection closed.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("no traffic within {:?}, closing", WS_PONG_WAIT);
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, &pending).await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    cancel.cancel();
    pending.lock().await.clear();
}

async fn handle_text_message(text: &str, pending: &PendingMap) {
    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    match pending.lock().await.remove(&msg.id) {
        Some(tx) => {
            let _ = tx.send(msg);
        }
        None => debug!(id = %msg.id, "response for unknown request, dropping"),
    }
}
