use std::sync::Arc;

use chunkdrop_protocol::messages::{
    MergeRequest, MergeResponse, UploadChunkResponse, VerifyRequest, VerifyResponse,
};
use chunkdrop_protocol::{ChunkFrameHeader, MergeStatus, storage_extension};
use tracing::debug;

use crate::chunk_store::{ChunkStore, PutOutcome};
use crate::merger::{MergeOutcome, Merger};
use crate::paths::StoragePaths;
use crate::{StoreConfig, StoreError, blocking};

/// Request-level upload operations over one storage root.
///
/// Translates protocol payloads into [`ChunkStore`] and [`Merger`] calls and
/// their results back into protocol payloads. Cheap to clone.
///
/// The artifact extension comes from the client filename; a suffix that is
/// not safe in a storage name is stored without extension.
#[derive(Clone)]
pub struct UploadService {
    store: ChunkStore,
    merger: Arc<Merger>,
}

impl UploadService {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            store: ChunkStore::new(config),
            merger: Arc::new(Merger::new(config)),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Reports whether the file is complete and which chunks are staged.
    pub async fn verify(&self, req: &VerifyRequest) -> Result<VerifyResponse, StoreError> {
        let store = self.store.clone();
        let fingerprint = req.fingerprint.clone();
        let extension = storage_extension(&req.filename).to_string();

        blocking(move || {
            if store.exists(&fingerprint, &extension)? {
                return Ok(VerifyResponse {
                    already_complete: true,
                    stored_chunk_keys: Vec::new(),
                });
            }
            Ok(VerifyResponse {
                already_complete: false,
                stored_chunk_keys: store.list_stored(&fingerprint)?,
            })
        })
        .await
    }

    /// Stores one chunk frame.
    pub async fn upload_chunk(
        &self,
        header: &ChunkFrameHeader,
        payload: Vec<u8>,
    ) -> Result<UploadChunkResponse, StoreError> {
        let store = self.store.clone();
        let fingerprint = header.fingerprint.clone();
        let extension = storage_extension(&header.filename).to_string();
        let key = header.chunk_key.clone();
        let checksum = header.checksum.clone();

        let outcome = blocking(move || {
            store.put(&fingerprint, &extension, &key, &payload, &checksum)
        })
        .await?;

        Ok(UploadChunkResponse {
            chunk_key: header.chunk_key.clone(),
            already_complete: outcome == PutOutcome::AlreadyComplete,
        })
    }

    /// Merges the staged chunks of a file.
    ///
    /// Merge outcomes, including staging and completeness failures, are
    /// reported as a [`MergeStatus`]. Only malformed requests are errors.
    pub async fn merge(&self, req: &MergeRequest) -> Result<MergeResponse, StoreError> {
        let extension = storage_extension(&req.filename);
        let result = self
            .merger
            .merge(&req.fingerprint, extension, req.chunk_size, req.total_size)
            .await;

        let path = StoragePaths::artifact_name(&req.fingerprint, extension);
        let response = match result {
            Ok(MergeOutcome::Merged(_)) => MergeResponse {
                path,
                ..MergeResponse::with_status(MergeStatus::Success, "")
            },
            Ok(MergeOutcome::AlreadyMerged(_)) => MergeResponse {
                path,
                ..MergeResponse::with_status(MergeStatus::AlreadyMerged, "file already exists")
            },
            Err(e @ StoreError::StagingMissing(_)) => {
                MergeResponse::with_status(MergeStatus::StagingMissing, e.to_string())
            }
            Err(StoreError::IncompleteChunks { expected, missing }) => MergeResponse {
                expected: Some(expected),
                missing,
                ..MergeResponse::with_status(MergeStatus::IncompleteChunks, "chunks missing")
            },
            Err(StoreError::StagingDiscarded(reason)) => {
                MergeResponse::with_status(MergeStatus::StagingDiscarded, reason)
            }
            Err(e @ (StoreError::InvalidName(_) | StoreError::InvalidRequest(_))) => return Err(e),
            Err(e) => MergeResponse::with_status(MergeStatus::Failed, e.to_string()),
        };

        debug!(fingerprint = %req.fingerprint, status = ?response.status, "merge answered");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkdrop_protocol::ChunkKey;
    use chunkdrop_transfer::checksum_bytes;
    use tempfile::TempDir;

    fn service(dir: &TempDir) -> UploadService {
        UploadService::new(&StoreConfig::new(dir.path()))
    }

    fn header(fp: &str, index: u64, filename: &str, payload: &[u8]) -> ChunkFrameHeader {
        ChunkFrameHeader {
            id: format!("req-{index}"),
            fingerprint: fp.into(),
            chunk_key: ChunkKey::new(fp, index),
            filename: filename.into(),
            checksum: checksum_bytes(payload),
        }
    }

    fn verify_req(fp: &str, filename: &str) -> VerifyRequest {
        VerifyRequest {
            fingerprint: fp.into(),
            filename: filename.into(),
        }
    }

    fn merge_req(fp: &str, filename: &str, chunk_size: u64, total_size: u64) -> MergeRequest {
        MergeRequest {
            fingerprint: fp.into(),
            filename: filename.into(),
            chunk_size,
            total_size,
        }
    }

    #[tokio::test]
    async fn verify_fresh_file() {
        let dir = TempDir::new().unwrap();
        let resp = service(&dir).verify(&verify_req("abc", "a.bin")).await.unwrap();
        assert!(!resp.already_complete);
        assert!(resp.stored_chunk_keys.is_empty());
    }

    #[tokio::test]
    async fn full_cycle() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);

        let parts: [&[u8]; 3] = [b"abcd", b"efgh", b"ij"];
        for (i, part) in parts.into_iter().enumerate() {
            let resp = svc
                .upload_chunk(&header("abc", i as u64, "movie.mp4", part), part.to_vec())
                .await
                .unwrap();
            assert_eq!(resp.chunk_key, ChunkKey::new("abc", i as u64));
            assert!(!resp.already_complete);
        }

        let verify = svc.verify(&verify_req("abc", "movie.mp4")).await.unwrap();
        assert_eq!(verify.stored_chunk_keys.len(), 3);

        let merged = svc.merge(&merge_req("abc", "movie.mp4", 4, 10)).await.unwrap();
        assert_eq!(merged.status, MergeStatus::Success);
        assert_eq!(merged.path, "abc.mp4");
        assert_eq!(
            std::fs::read(dir.path().join("abc.mp4")).unwrap(),
            b"abcdefghij"
        );

        let verify = svc.verify(&verify_req("abc", "other-name.mp4")).await.unwrap();
        assert!(verify.already_complete);
        assert!(verify.stored_chunk_keys.is_empty());

        let again = svc.merge(&merge_req("abc", "movie.mp4", 4, 10)).await.unwrap();
        assert_eq!(again.status, MergeStatus::AlreadyMerged);
        assert!(again.status.is_success());

        let late = svc
            .upload_chunk(&header("abc", 0, "movie.mp4", b"abcd"), b"abcd".to_vec())
            .await
            .unwrap();
        assert!(late.already_complete);
    }

    #[tokio::test]
    async fn merge_without_chunks_reports_staging_missing() {
        let dir = TempDir::new().unwrap();
        let resp = service(&dir)
            .merge(&merge_req("abc", "a.bin", 4, 10))
            .await
            .unwrap();
        assert_eq!(resp.status, MergeStatus::StagingMissing);
        assert!(!resp.status.is_success());
    }

    #[tokio::test]
    async fn merge_reports_missing_indices() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        svc.upload_chunk(&header("abc", 1, "a.bin", b"efgh"), b"efgh".to_vec())
            .await
            .unwrap();

        let resp = svc.merge(&merge_req("abc", "a.bin", 4, 10)).await.unwrap();
        assert_eq!(resp.status, MergeStatus::IncompleteChunks);
        assert_eq!(resp.expected, Some(3));
        assert_eq!(resp.missing, vec![0, 2]);
    }

    async fn upload_in_parts(
        svc: &UploadService,
        fp: &str,
        filename: &str,
        data: &[u8],
        size: usize,
    ) {
        for (i, part) in data.chunks(size).enumerate() {
            svc.upload_chunk(&header(fp, i as u64, filename, part), part.to_vec())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn extensionless_file_full_cycle() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        upload_in_parts(&svc, "abc", "README", b"read me first", 8).await;

        let merged = svc.merge(&merge_req("abc", "README", 8, 13)).await.unwrap();
        assert_eq!(merged.status, MergeStatus::Success, "{}", merged.message);
        assert_eq!(merged.path, "abc");
        assert_eq!(std::fs::read(dir.path().join("abc")).unwrap(), b"read me first");

        let verify = svc.verify(&verify_req("abc", "Makefile")).await.unwrap();
        assert!(verify.already_complete);
    }

    #[tokio::test]
    async fn unusual_suffixes_are_stored_without_extension() {
        for (fp, filename) in [
            ("a1", "notes."),
            ("a2", "app.v1+b"),
            ("a3", "my file.tar gz"),
            ("a4", "photo.jpeg~"),
        ] {
            let dir = TempDir::new().unwrap();
            let svc = service(&dir);
            upload_in_parts(&svc, fp, filename, b"0123456789", 4).await;

            let merged = svc.merge(&merge_req(fp, filename, 4, 10)).await.unwrap();
            assert_eq!(merged.status, MergeStatus::Success, "{filename:?}");
            assert_eq!(merged.path, fp);
            assert_eq!(std::fs::read(dir.path().join(fp)).unwrap(), b"0123456789");
        }
    }

    #[tokio::test]
    async fn merge_with_other_chunk_size_discards_staging() {
        let dir = TempDir::new().unwrap();
        let svc = service(&dir);
        upload_in_parts(&svc, "abc", "a.bin", b"0123456789", 4).await;

        let resp = svc.merge(&merge_req("abc", "a.bin", 5, 10)).await.unwrap();
        assert_eq!(resp.status, MergeStatus::StagingDiscarded);
        assert!(!resp.message.is_empty());
        let verify = svc.verify(&verify_req("abc", "a.bin")).await.unwrap();
        assert!(verify.stored_chunk_keys.is_empty());
    }

    #[tokio::test]
    async fn merge_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let err = service(&dir)
            .merge(&merge_req("../abc", "a.bin", 4, 10))
            .await
            .unwrap_err();
        assert_eq!(err.code(), 400);
    }

    #[tokio::test]
    async fn upload_chunk_checksum_error_code() {
        let dir = TempDir::new().unwrap();
        let mut h = header("abc", 0, "a.bin", b"abcd");
        h.checksum = checksum_bytes(b"zzzz");
        let err = service(&dir)
            .upload_chunk(&h, b"abcd".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), 422);
    }

    #[tokio::test]
    async fn empty_file_merges_directly() {
        let dir = TempDir::new().unwrap();
        let resp = service(&dir)
            .merge(&merge_req("d41d8cd98f00b204e9800998ecf8427e", "empty", 1024, 0))
            .await
            .unwrap();
        assert_eq!(resp.status, MergeStatus::Success);
        assert!(dir.path().join("d41d8cd98f00b204e9800998ecf8427e").is_file());
    }
}
