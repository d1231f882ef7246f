//! WebSocket ping pump: periodic keepalive.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use chunkdrop_protocol::constants::WS_PING_PERIOD;

/// Queues a ping every [`WS_PING_PERIOD`] so the server's idle timer
/// never fires while a long merge is pending.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ping = tungstenite::Message::Ping(Vec::new().into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
