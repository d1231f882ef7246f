//! [`Handler`] backed by a local storage root.

use chunkdrop_protocol::constants::WS_ERR_CODE_BAD_REQUEST;
use chunkdrop_protocol::messages::{MergeRequest, VerifyRequest};
use chunkdrop_protocol::{ChunkFrameHeader, Message, MessageType};
use chunkdrop_store::{StoreConfig, UploadService};
use serde::Serialize;

use crate::connection::Sender;
use crate::handler::{Handler, HandlerFuture};

/// Serves verify, chunk and merge requests from an [`UploadService`].
pub struct StoreHandler {
    service: UploadService,
}

impl StoreHandler {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            service: UploadService::new(config),
        }
    }

    pub fn service(&self) -> &UploadService {
        &self.service
    }
}

fn reply<T: Serialize>(sender: &Sender, req: &Message, msg_type: MessageType, payload: &T) {
    match req.reply(msg_type, Some(payload)) {
        Ok(msg) => {
            let _ = sender.send_msg(msg);
        }
        Err(e) => {
            tracing::error!(id = %req.id, "failed to encode reply: {e}");
        }
    }
}

impl Handler for StoreHandler {
    fn on_verify(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: VerifyRequest = match msg.parse_payload() {
                Ok(Some(r)) => r,
                _ => {
                    let _ = sender.send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "invalid payload");
                    return;
                }
            };

            match self.service.verify(&req).await {
                Ok(resp) => {
                    tracing::debug!(
                        fingerprint = %req.fingerprint,
                        complete = resp.already_complete,
                        stored = resp.stored_chunk_keys.len(),
                        "verify"
                    );
                    reply(&sender, &msg, MessageType::VerifyResponse, &resp);
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %req.fingerprint, "verify failed: {e}");
                    let _ = sender.send_error(&msg, e.code(), &e.to_string());
                }
            }
        })
    }

    fn on_merge(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let req: MergeRequest = match msg.parse_payload() {
                Ok(Some(r)) => r,
                _ => {
                    let _ = sender.send_error(&msg, WS_ERR_CODE_BAD_REQUEST, "invalid payload");
                    return;
                }
            };

            match self.service.merge(&req).await {
                Ok(resp) => reply(&sender, &msg, MessageType::MergeResponse, &resp),
                Err(e) => {
                    tracing::warn!(fingerprint = %req.fingerprint, "merge rejected: {e}");
                    let _ = sender.send_error(&msg, e.code(), &e.to_string());
                }
            }
        })
    }

    fn on_chunk_frame(
        &self,
        sender: Sender,
        header: ChunkFrameHeader,
        payload: Vec<u8>,
    ) -> HandlerFuture<'_> {
        Box::pin(async move {
            let result = self.service.upload_chunk(&header, payload).await;
            let msg = match result {
                Ok(resp) => Message::new(&header.id, MessageType::UploadChunkResponse, Some(&resp)),
                Err(e) => {
                    tracing::warn!(key = %header.chunk_key, "chunk rejected: {e}");
                    Ok(Message::error(&header.id, e.code(), e.to_string()))
                }
            };
            match msg {
                Ok(msg) => {
                    let _ = sender.send_msg(msg);
                }
                Err(e) => tracing::error!(id = %header.id, "failed to encode reply: {e}"),
            }
        })
    }
}
