//! Handler trait for processing upload requests.
//!
//! Implementors provide the storage logic while the server framework
//! handles connection management, routing and the binary frame codec.

use std::future::Future;
use std::pin::Pin;

use chunkdrop_protocol::constants::WS_ERR_CODE_NOT_IMPLEMENTED;
use chunkdrop_protocol::{ChunkFrameHeader, Message, MessageType};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from an upload client.
///
/// Each method receives a `sender` for the reply and the request. Every
/// request runs on its own task, so handlers must tolerate concurrent calls.
///
/// Default implementations reply with "not implemented".
pub trait Handler: Send + Sync + 'static {
    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called for `verify`.
    fn on_verify(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `merge`.
    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for a binary chunk frame.
    fn on_chunk_frame(
        &self,
        sender: Sender,
        header: ChunkFrameHeader,
        payload: Vec<u8>,
    ) -> HandlerFuture<'_> {
        let _ = payload;
        Box::pin(async move {
            let reply = Message::error(header.id, WS_ERR_CODE_NOT_IMPLEMENTED, "not implemented");
            let _ = sender.send_msg(reply);
        })
    }

    /// Called when a client disconnects (cleanup hook).
    fn on_client_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
