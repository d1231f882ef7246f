//! Upload pipeline for one file.

use std::io;
use std::path::Path;

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use chunkdrop_protocol::messages::{
    MergeRequest, MergeResponse, UploadChunkResponse, VerifyRequest, VerifyResponse,
};
use chunkdrop_protocol::{ChunkFrameHeader, MergeStatus, MessageType, storage_extension};
use chunkdrop_transfer::{
    ChunkLayout, ChunkReader, HashEvent, HashWorker, TransferError, TransferRate, UploadPlan,
    UploadPlanner,
};

use crate::connection::StoreConnection;
use crate::error::UploadError;
use crate::types::{UploadEvent, UploadOptions, UploadOutcome};

/// Uploads files over one [`StoreConnection`].
pub struct UploadSession<'a> {
    conn: &'a dyn StoreConnection,
    options: UploadOptions,
    cancel: CancellationToken,
}

/// Identity of the file being uploaded.
struct Target<'p> {
    path: &'p Path,
    filename: String,
    fingerprint: String,
    layout: ChunkLayout,
}

impl<'a> UploadSession<'a> {
    pub fn new(
        conn: &'a dyn StoreConnection,
        options: UploadOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            conn,
            options,
            cancel,
        }
    }

    /// Uploads `path`, resuming from whatever the server already holds.
    ///
    /// 1. Fingerprint the file on a blocking worker.
    /// 2. Ask the server what it has.
    /// 3. Send the missing chunks, `parallelism` at a time.
    /// 4. Ask the server to merge.
    ///
    /// Progress is reported on `events_tx`; a closed receiver is ignored.
    pub async fn upload(
        &self,
        path: &Path,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, UploadError> {
        self.check_cancelled()?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                UploadError::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                ))
            })?;
        let total_size = tokio::fs::metadata(path).await?.len();
        let layout = self
            .options
            .chunk_policy
            .layout_for(total_size)
            .map_err(UploadError::Hash)?;

        info!(
            file = %path.display(),
            total_bytes = total_size,
            chunks = layout.chunk_count(),
            chunk_size = layout.chunk_size(),
            "starting upload"
        );

        // 1. Fingerprint
        let fingerprint = self.hash(path, layout, events_tx).await?;
        emit(events_tx, UploadEvent::Hashed {
            fingerprint: fingerprint.clone(),
        })
        .await;
        self.check_cancelled()?;

        let target = Target {
            path,
            filename,
            fingerprint,
            layout,
        };

        // 2. Verify + plan
        let verify = self.verify(&target).await?;
        let plan = UploadPlanner::new(layout).plan(&target.fingerprint, &verify);
        emit(events_tx, UploadEvent::Planned {
            total_chunks: layout.chunk_count(),
            to_send: plan.chunks_to_send.len() as u64,
            skip: plan.skip,
        })
        .await;

        let artifact = format!(
            "{}{}",
            target.fingerprint,
            storage_extension(&target.filename)
        );
        if plan.skip {
            info!(fingerprint = %target.fingerprint, "file already on server");
            emit(events_tx, UploadEvent::Completed {
                path: artifact.clone(),
                instant: true,
            })
            .await;
            return Ok(UploadOutcome {
                fingerprint: target.fingerprint,
                path: artifact,
                chunks_sent: 0,
                instant: true,
                merge_status: None,
            });
        }

        // 3. Transmit
        let mut chunks_sent = self.transmit(&target, &plan, events_tx).await?;
        self.check_cancelled()?;

        // 4. Merge
        emit(events_tx, UploadEvent::Merging).await;
        let merged = match self.merge(&target).await {
            // Staged chunks from an upload with another layout: send all again.
            Err(UploadError::StagingDiscarded(reason)) => {
                warn!(
                    fingerprint = %target.fingerprint,
                    %reason,
                    "server discarded staged chunks, resending"
                );
                let full = UploadPlanner::new(layout).plan_indices(false, std::iter::empty());
                emit(events_tx, UploadEvent::Planned {
                    total_chunks: layout.chunk_count(),
                    to_send: full.chunks_to_send.len() as u64,
                    skip: false,
                })
                .await;
                chunks_sent += self.transmit(&target, &full, events_tx).await?;
                self.check_cancelled()?;
                emit(events_tx, UploadEvent::Merging).await;
                self.merge(&target).await?
            }
            result => result?,
        };
        let path = if merged.path.is_empty() {
            artifact
        } else {
            merged.path
        };

        info!(
            fingerprint = %target.fingerprint,
            path = %path,
            chunks_sent,
            "upload complete"
        );
        emit(events_tx, UploadEvent::Completed {
            path: path.clone(),
            instant: false,
        })
        .await;

        Ok(UploadOutcome {
            fingerprint: target.fingerprint,
            path,
            chunks_sent,
            instant: false,
            merge_status: Some(merged.status),
        })
    }

    /// Runs the hash worker to completion, forwarding its progress.
    async fn hash(
        &self,
        path: &Path,
        layout: ChunkLayout,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<String, UploadError> {
        let mut worker = HashWorker::spawn(path, layout);

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    worker.cancel();
                    return Err(UploadError::Cancelled);
                }
                event = worker.next_event() => event,
            };

            match event {
                Some(HashEvent::Progress {
                    bytes_hashed,
                    total_bytes,
                }) => {
                    emit(events_tx, UploadEvent::Hashing {
                        bytes_hashed,
                        total_bytes,
                    })
                    .await;
                }
                Some(HashEvent::Done { fingerprint }) => return Ok(fingerprint),
                Some(HashEvent::Failed(TransferError::Cancelled)) => {
                    return Err(UploadError::Cancelled);
                }
                Some(HashEvent::Failed(e)) => return Err(UploadError::Hash(e)),
                None => return Err(UploadError::Hash(TransferError::WorkerStopped)),
            }
        }
    }

    async fn verify(&self, target: &Target<'_>) -> Result<VerifyResponse, UploadError> {
        let req = VerifyRequest {
            fingerprint: target.fingerprint.clone(),
            filename: target.filename.clone(),
        };
        let resp = self
            .conn
            .send_request(MessageType::Verify, serde_json::to_value(&req)?)
            .await?;
        resp.parse_payload::<VerifyResponse>()?
            .ok_or_else(|| UploadError::UnexpectedResponse("empty verify response".into()))
    }

    /// Sends every chunk in `plan`, returning how many were acknowledged.
    ///
    /// The first failure aborts the remaining sends.
    async fn transmit(
        &self,
        target: &Target<'_>,
        plan: &UploadPlan,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<u64, UploadError> {
        let layout = target.layout;
        let pending_bytes: u64 = plan
            .chunks_to_send
            .iter()
            .filter_map(|&i| layout.range(i))
            .map(|r| r.end - r.start)
            .sum();
        let mut bytes_done = layout.total_size() - pending_bytes;
        let mut rate = TransferRate::default();
        let mut sent = 0u64;

        debug!(
            fingerprint = %target.fingerprint,
            chunks = plan.chunks_to_send.len(),
            bytes = pending_bytes,
            resumed_bytes = bytes_done,
            "transmitting chunks"
        );

        let mut acks = stream::iter(plan.chunks_to_send.iter().copied())
            .map(|index| self.send_chunk(target, index))
            .buffer_unordered(self.options.parallelism.max(1));

        while let Some(result) = acks.next().await {
            let (index, len) = result?;
            sent += 1;
            bytes_done += len;
            rate.record(len);
            emit(events_tx, UploadEvent::ChunkSent {
                index,
                bytes_done,
                total_bytes: layout.total_size(),
                bytes_per_second: rate.bytes_per_second(),
                eta: rate.eta(layout.total_size() - bytes_done),
            })
            .await;
        }

        Ok(sent)
    }

    /// Reads one chunk with its own file handle and sends it.
    async fn send_chunk(&self, target: &Target<'_>, index: u64) -> Result<(u64, u64), UploadError> {
        self.check_cancelled()?;

        let chunk = tokio::task::spawn_blocking({
            let path = target.path.to_path_buf();
            let layout = target.layout;
            move || {
                let mut reader = ChunkReader::with_layout(&path, layout)?;
                let chunk = reader.read_chunk(index)?;
                let checksum = chunk.checksum();
                Ok::<_, TransferError>((chunk, checksum))
            }
        })
        .await
        .map_err(|e| UploadError::ChunkRead(TransferError::Io(io::Error::other(e))))?;
        let (chunk, checksum) = chunk.map_err(UploadError::ChunkRead)?;

        let key = chunk.key(&target.fingerprint);
        let len = chunk.data.len() as u64;
        let header = ChunkFrameHeader {
            id: String::new(),
            fingerprint: target.fingerprint.clone(),
            chunk_key: key.clone(),
            filename: target.filename.clone(),
            checksum,
        };

        let resp = tokio::select! {
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            resp = self.conn.send_chunk(header, chunk.data) => resp?,
        };
        let ack: UploadChunkResponse = resp.parse_payload()?.ok_or_else(|| {
            UploadError::UnexpectedResponse(format!("empty acknowledgement for {key}"))
        })?;
        if ack.chunk_key != key {
            return Err(UploadError::UnexpectedResponse(format!(
                "sent {key}, server acknowledged {}",
                ack.chunk_key
            )));
        }

        Ok((index, len))
    }

    async fn merge(&self, target: &Target<'_>) -> Result<MergeResponse, UploadError> {
        let req = MergeRequest {
            fingerprint: target.fingerprint.clone(),
            filename: target.filename.clone(),
            chunk_size: target.layout.chunk_size(),
            total_size: target.layout.total_size(),
        };
        let resp = self
            .conn
            .send_request(MessageType::Merge, serde_json::to_value(&req)?)
            .await?;
        let merged: MergeResponse = resp
            .parse_payload()?
            .ok_or_else(|| UploadError::UnexpectedResponse("empty merge response".into()))?;

        match merged.status {
            MergeStatus::Success | MergeStatus::AlreadyMerged => Ok(merged),
            MergeStatus::StagingMissing => Err(UploadError::StagingMissing(merged.message)),
            MergeStatus::IncompleteChunks => Err(UploadError::IncompleteChunks {
                expected: merged.expected.unwrap_or(target.layout.chunk_count()),
                missing: merged.missing,
            }),
            MergeStatus::StagingDiscarded => Err(UploadError::StagingDiscarded(merged.message)),
            MergeStatus::Failed => Err(UploadError::Merge(merged.message)),
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        Ok(())
    }
}

async fn emit(events_tx: &mpsc::Sender<UploadEvent>, event: UploadEvent) {
    let _ = events_tx.send(event).await;
}
