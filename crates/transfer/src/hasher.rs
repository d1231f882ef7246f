//! Whole-file fingerprinting.
//!
//! The fingerprint is the lowercase-hex MD5 digest of the file's bytes in
//! order. It does not depend on the chunk size used to read the file.

use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::TransferError;
use crate::chunker::{ChunkLayout, ChunkReader};

/// Number of buffered events between the worker and its owner.
const EVENT_BUFFER: usize = 64;

/// Streaming MD5 over a file's chunks.
///
/// Chunks must be fed in increasing index order.
pub struct IncrementalHasher {
    digest: Md5,
    bytes_hashed: u64,
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            digest: Md5::new(),
            bytes_hashed: 0,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.digest.update(data);
        self.bytes_hashed += data.len() as u64;
    }

    pub fn bytes_hashed(&self) -> u64 {
        self.bytes_hashed
    }

    /// Consumes the hasher and returns the fingerprint.
    pub fn finalize(self) -> String {
        hex::encode(self.digest.finalize())
    }
}

/// Fingerprint of an in-memory buffer.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = IncrementalHasher::new();
    hasher.feed(data);
    hasher.finalize()
}

/// Fingerprints a file synchronously, reading one chunk at a time.
pub fn fingerprint_file(path: &Path, chunk_size: u64) -> Result<String, TransferError> {
    let mut hasher = IncrementalHasher::new();
    for chunk in ChunkReader::open(path, chunk_size)? {
        hasher.feed(&chunk?.data);
    }
    Ok(hasher.finalize())
}

/// Events reported by a [`HashWorker`].
#[derive(Debug)]
pub enum HashEvent {
    /// Sent after every chunk.
    Progress { bytes_hashed: u64, total_bytes: u64 },
    /// Terminal: hashing finished.
    Done { fingerprint: String },
    /// Terminal: hashing aborted, no fingerprint.
    Failed(TransferError),
}

/// Hashes a file on a blocking thread and streams [`HashEvent`]s back.
///
/// Dropping the worker cancels it.
pub struct HashWorker {
    events: mpsc::Receiver<HashEvent>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HashWorker {
    /// Starts hashing `path` according to `layout`.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>, layout: ChunkLayout) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let event = match hash_chunks(&path, layout, &token, &tx) {
                Ok(fingerprint) => {
                    debug!(path = %path.display(), fingerprint = %fingerprint, "hashing complete");
                    HashEvent::Done { fingerprint }
                }
                Err(e) => HashEvent::Failed(e),
            };
            // Receiver may already be gone.
            let _ = tx.blocking_send(event);
        });

        Self {
            events: rx,
            cancel,
            handle: Some(handle),
        }
    }

    /// Next event, or `None` once the worker has exited and the stream is drained.
    pub async fn next_event(&mut self) -> Option<HashEvent> {
        self.events.recv().await
    }

    /// Stops the worker before its next chunk.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the worker, forwarding progress to `on_progress`, and returns
    /// the fingerprint.
    pub async fn finish<F>(mut self, mut on_progress: F) -> Result<String, TransferError>
    where
        F: FnMut(u64, u64),
    {
        let result = loop {
            match self.events.recv().await {
                Some(HashEvent::Progress {
                    bytes_hashed,
                    total_bytes,
                }) => on_progress(bytes_hashed, total_bytes),
                Some(HashEvent::Done { fingerprint }) => break Ok(fingerprint),
                Some(HashEvent::Failed(e)) => break Err(e),
                None => break Err(TransferError::WorkerStopped),
            }
        };

        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        result
    }
}

impl Drop for HashWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn hash_chunks(
    path: &Path,
    layout: ChunkLayout,
    cancel: &CancellationToken,
    events: &mpsc::Sender<HashEvent>,
) -> Result<String, TransferError> {
    let mut reader = ChunkReader::with_layout(path, layout)?;
    let mut hasher = IncrementalHasher::new();
    let total_bytes = layout.total_size();

    for index in layout.indices() {
        if cancel.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        let chunk = reader.read_chunk(index)?;
        hasher.feed(&chunk.data);
        drop(chunk);

        let progress = HashEvent::Progress {
            bytes_hashed: hasher.bytes_hashed(),
            total_bytes,
        };
        if events.blocking_send(progress).is_err() {
            return Err(TransferError::Cancelled);
        }
    }

    Ok(hasher.finalize())
}
