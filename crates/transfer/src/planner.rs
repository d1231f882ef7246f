use std::collections::BTreeSet;

use chunkdrop_protocol::ChunkKey;
use chunkdrop_protocol::messages::VerifyResponse;
use tracing::debug;

use crate::chunker::ChunkLayout;

/// What a client still has to do for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    /// The server already holds the final artifact.
    pub skip: bool,
    /// Indices that still have to be transmitted, ascending.
    pub chunks_to_send: BTreeSet<u64>,
}

impl UploadPlan {
    /// Number of chunks the server already holds.
    pub fn stored_count(&self, layout: &ChunkLayout) -> u64 {
        if self.skip {
            return layout.chunk_count();
        }
        layout.chunk_count() - self.chunks_to_send.len() as u64
    }
}

/// Diffs a file's chunk layout against the server's stored chunks.
pub struct UploadPlanner {
    layout: ChunkLayout,
}

impl UploadPlanner {
    pub fn new(layout: ChunkLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Plans the upload of `fingerprint` given the server's verify reply.
    ///
    /// Stored keys for another fingerprint, or past the last chunk, are ignored.
    pub fn plan(&self, fingerprint: &str, verify: &VerifyResponse) -> UploadPlan {
        let stored = verify
            .stored_chunk_keys
            .iter()
            .filter(|key| key.fingerprint() == fingerprint)
            .map(ChunkKey::index);
        let plan = self.plan_indices(verify.already_complete, stored);
        debug!(
            fingerprint,
            skip = plan.skip,
            to_send = plan.chunks_to_send.len(),
            "upload planned"
        );
        plan
    }

    /// Plans from raw stored indices.
    pub fn plan_indices(
        &self,
        already_complete: bool,
        stored: impl IntoIterator<Item = u64>,
    ) -> UploadPlan {
        if already_complete {
            return UploadPlan {
                skip: true,
                chunks_to_send: BTreeSet::new(),
            };
        }

        let mut chunks_to_send: BTreeSet<u64> = self.layout.indices().collect();
        for index in stored {
            chunks_to_send.remove(&index);
        }
        UploadPlan {
            skip: false,
            chunks_to_send,
        }
    }
}
