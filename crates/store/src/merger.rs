use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chunkdrop_protocol::ChunkKey;
use chunkdrop_transfer::ChunkLayout;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::paths::StoragePaths;
use crate::validation::{validate_extension, validate_fingerprint};
use crate::{StoreConfig, StoreError, blocking};

/// Upper bound on chunk writers running at once during one merge.
const MAX_CONCURRENT_WRITERS: usize = 16;

/// Successful result of a merge request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The artifact was assembled by this call.
    Merged(PathBuf),
    /// The artifact already existed; nothing was done.
    AlreadyMerged(PathBuf),
}

impl MergeOutcome {
    pub fn path(&self) -> &Path {
        match self {
            MergeOutcome::Merged(p) | MergeOutcome::AlreadyMerged(p) => p,
        }
    }
}

/// One staged chunk ready to be copied into the output.
struct Placement {
    offset: u64,
    source: PathBuf,
}

/// Assembles staged chunks into the final artifact.
///
/// Merges of the same fingerprint are serialized; merges of different
/// fingerprints run independently.
pub struct Merger {
    paths: StoragePaths,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Merger {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            paths: StoragePaths::new(&config.root),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Builds `<fingerprint><extension>` from the chunks staged for
    /// `fingerprint`, each placed at `index * chunk_size`.
    ///
    /// On failure no artifact is created. The staged chunks are kept, unless
    /// they do not fit the requested layout: then they can never merge and
    /// are removed ([`StoreError::StagingDiscarded`]).
    pub async fn merge(
        &self,
        fingerprint: &str,
        extension: &str,
        chunk_size: u64,
        total_size: u64,
    ) -> Result<MergeOutcome, StoreError> {
        validate_fingerprint(fingerprint)?;
        validate_extension(extension)?;

        let lock = self.lock_for(fingerprint).await;
        let result = {
            let _guard = lock.lock().await;
            self.merge_locked(fingerprint, extension, chunk_size, total_size)
                .await
        };
        self.release(fingerprint, lock).await;

        if let Err(e) = &result {
            error!(fingerprint, error = %e, "merge failed");
        }
        result
    }

    async fn lock_for(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(fingerprint.to_string()).or_default())
    }

    async fn release(&self, fingerprint: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        // Only the map and this caller hold it: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(fingerprint);
        }
    }

    async fn merge_locked(
        &self,
        fingerprint: &str,
        extension: &str,
        chunk_size: u64,
        total_size: u64,
    ) -> Result<MergeOutcome, StoreError> {
        let artifact = self.paths.artifact(fingerprint, extension);
        let staging = self.paths.staging_dir(fingerprint);

        let probe = artifact.clone();
        if blocking(move || Ok(probe.is_file())).await? {
            return Ok(MergeOutcome::AlreadyMerged(artifact));
        }

        let temp = self.paths.artifact_temp(fingerprint, extension);

        if total_size == 0 {
            let (temp_c, artifact_c, staging_c) = (temp.clone(), artifact.clone(), staging.clone());
            blocking(move || {
                File::create(&temp_c)?.sync_all()?;
                fs::rename(&temp_c, &artifact_c).inspect_err(|_| {
                    let _ = fs::remove_file(&temp_c);
                })?;
                remove_staging(&staging_c);
                Ok(())
            })
            .await?;
            info!(fingerprint, path = %artifact.display(), "empty artifact created");
            return Ok(MergeOutcome::Merged(artifact));
        }

        let layout = ChunkLayout::new(total_size, chunk_size)
            .map_err(|e| StoreError::InvalidRequest(e.to_string()))?;

        let paths = self.paths.clone();
        let fp = fingerprint.to_string();
        let staging_c = staging.clone();
        let placements = blocking(move || {
            let staged = paths
                .read_staged(&fp)?
                .ok_or_else(|| StoreError::StagingMissing(fp.clone()))?;
            match plan_placements(&layout, staged) {
                Err(
                    e @ (StoreError::UnexpectedChunk { .. }
                    | StoreError::ChunkSizeMismatch { .. }),
                ) => {
                    warn!(
                        fingerprint = %fp,
                        error = %e,
                        "staged chunks do not fit layout, discarding"
                    );
                    remove_staging(&staging_c);
                    Err(StoreError::StagingDiscarded(e.to_string()))
                }
                result => result,
            }
        })
        .await?;

        info!(
            fingerprint,
            chunks = placements.len(),
            bytes = total_size,
            "merge started"
        );

        if let Err(e) = write_output(&temp, total_size, placements).await {
            let temp_c = temp.clone();
            let _ = blocking(move || Ok(fs::remove_file(&temp_c))).await;
            return Err(e);
        }

        let (temp_c, artifact_c) = (temp.clone(), artifact.clone());
        blocking(move || {
            fs::rename(&temp_c, &artifact_c).inspect_err(|_| {
                let _ = fs::remove_file(&temp_c);
            })?;
            remove_staging(&staging);
            Ok(())
        })
        .await?;

        info!(fingerprint, path = %artifact.display(), "merge complete");
        Ok(MergeOutcome::Merged(artifact))
    }
}

/// Checks the staged set against the layout and maps each chunk to its
/// output offset.
fn plan_placements(
    layout: &ChunkLayout,
    staged: Vec<(ChunkKey, PathBuf)>,
) -> Result<Vec<Placement>, StoreError> {
    let expected = layout.chunk_count();
    let present: BTreeSet<u64> = staged.iter().map(|(key, _)| key.index()).collect();

    let missing: Vec<u64> = layout.indices().filter(|i| !present.contains(i)).collect();
    if !missing.is_empty() {
        return Err(StoreError::IncompleteChunks { expected, missing });
    }

    let mut placements = Vec::with_capacity(staged.len());
    for (key, source) in staged {
        let index = key.index();
        let range = layout
            .range(index)
            .ok_or(StoreError::UnexpectedChunk { index, expected })?;

        let actual = fs::metadata(&source)?.len();
        let want = range.end - range.start;
        if actual != want {
            return Err(StoreError::ChunkSizeMismatch {
                index,
                expected: want,
                actual,
            });
        }
        placements.push(Placement {
            offset: range.start,
            source,
        });
    }
    Ok(placements)
}

/// Pre-sizes `temp` and copies every chunk into it concurrently.
async fn write_output(
    temp: &Path,
    total_size: u64,
    placements: Vec<Placement>,
) -> Result<(), StoreError> {
    let temp_c = temp.to_path_buf();
    blocking(move || {
        let file = File::create(&temp_c)?;
        file.set_len(total_size)?;
        Ok(())
    })
    .await?;

    let permits = Arc::new(Semaphore::new(MAX_CONCURRENT_WRITERS));
    let mut writers = JoinSet::new();
    for placement in placements {
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Io(io::Error::other(e)))?;
        let output = temp.to_path_buf();
        writers.spawn_blocking(move || {
            let _permit = permit;
            copy_at(&placement.source, &output, placement.offset)
        });
    }

    // Drain every writer before reporting, so none is still touching the file.
    let mut first_err: Option<StoreError> = None;
    while let Some(joined) = writers.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => StoreError::Io(e),
            Err(e) => StoreError::Io(io::Error::other(e)),
        };
        first_err.get_or_insert(err);
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Copies `source` into `output` at `offset` through a private file handle.
fn copy_at(source: &Path, output: &Path, offset: u64) -> io::Result<()> {
    let mut input = File::open(source)?;
    let mut out = OpenOptions::new().write(true).open(output)?;
    out.seek(SeekFrom::Start(offset))?;
    io::copy(&mut input, &mut out)?;
    out.sync_all()
}

fn remove_staging(staging: &Path) {
    match fs::remove_dir_all(staging) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %staging.display(), error = %e, "failed to remove staging area"),
    }
}
