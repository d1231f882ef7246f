use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use chunkdrop_protocol::ChunkKey;
use chunkdrop_transfer::checksum_bytes;
use tracing::{debug, info};

use crate::paths::StoragePaths;
use crate::validation::{validate_chunk_key, validate_extension, validate_fingerprint};
use crate::{StoreConfig, StoreError};

/// Result of storing one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    /// The final artifact already exists; nothing was written.
    AlreadyComplete,
}

/// Durable staging of uploaded chunks.
///
/// All methods block on file I/O; async callers run them on a blocking thread.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    paths: StoragePaths,
    max_chunk_size: u64,
}

impl ChunkStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            paths: StoragePaths::new(&config.root),
            max_chunk_size: config.max_chunk_size,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    /// Persists `payload` as chunk `key` of `fingerprint`.
    ///
    /// The chunk becomes visible under its key only once fully written and
    /// synced, so a crash or a concurrent put of the same key never leaves a
    /// partial chunk behind. A non-empty `checksum` must be the SHA-256 hex
    /// digest of `payload`.
    pub fn put(
        &self,
        fingerprint: &str,
        extension: &str,
        key: &ChunkKey,
        payload: &[u8],
        checksum: &str,
    ) -> Result<PutOutcome, StoreError> {
        validate_chunk_key(fingerprint, key)?;
        validate_extension(extension)?;

        let size = payload.len() as u64;
        if size > self.max_chunk_size {
            return Err(StoreError::ChunkTooLarge {
                size,
                limit: self.max_chunk_size,
            });
        }
        if !checksum.is_empty() && !checksum.eq_ignore_ascii_case(&checksum_bytes(payload)) {
            return Err(StoreError::ChecksumMismatch {
                key: key.to_string(),
            });
        }

        if self.exists(fingerprint, extension)? {
            debug!(%key, "artifact already complete, chunk dropped");
            return Ok(PutOutcome::AlreadyComplete);
        }

        let staging = self.paths.staging_dir(fingerprint);
        if !staging.is_dir() {
            fs::create_dir_all(&staging)?;
            info!(fingerprint, path = %staging.display(), "staging area created");
        }

        let temp = self.paths.chunk_temp(key);
        let target = self.paths.chunk(key);
        if let Err(e) = write_synced(&temp, payload).and_then(|()| fs::rename(&temp, &target)) {
            let _ = fs::remove_file(&temp);
            return Err(e.into());
        }

        debug!(%key, bytes = size, "chunk stored");
        Ok(PutOutcome::Stored)
    }

    /// Keys of the chunks staged for `fingerprint`, in numeric index order.
    pub fn list_stored(&self, fingerprint: &str) -> Result<Vec<ChunkKey>, StoreError> {
        validate_fingerprint(fingerprint)?;
        let staged = self.paths.read_staged(fingerprint)?.unwrap_or_default();
        Ok(staged.into_iter().map(|(key, _)| key).collect())
    }

    /// Whether the final artifact `<fingerprint><extension>` exists.
    pub fn exists(&self, fingerprint: &str, extension: &str) -> Result<bool, StoreError> {
        validate_fingerprint(fingerprint)?;
        validate_extension(extension)?;
        match fs::metadata(self.paths.artifact(fingerprint, extension)) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}
