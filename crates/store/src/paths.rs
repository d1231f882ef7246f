use std::io;
use std::path::{Path, PathBuf};

use chunkdrop_protocol::ChunkKey;

/// Directory under the root that holds one staging area per fingerprint.
///
/// Artifact names start with a fingerprint character, never a `.`, so an
/// artifact can never land on a staging path.
const STAGING_DIR: &str = ".staging";

/// Path construction under a storage root.
///
/// Callers validate names first (see [`crate::validate_fingerprint`]).
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final artifact name relative to the root.
    pub fn artifact_name(fingerprint: &str, extension: &str) -> String {
        format!("{fingerprint}{extension}")
    }

    pub fn artifact(&self, fingerprint: &str, extension: &str) -> PathBuf {
        self.root.join(Self::artifact_name(fingerprint, extension))
    }

    pub fn staging_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join(STAGING_DIR).join(fingerprint)
    }

    pub fn chunk(&self, key: &ChunkKey) -> PathBuf {
        self.staging_dir(key.fingerprint()).join(key.to_string())
    }

    /// Unique temp file next to the chunk it will become.
    pub(crate) fn chunk_temp(&self, key: &ChunkKey) -> PathBuf {
        self.staging_dir(key.fingerprint())
            .join(format!(".{key}.{}.part", uuid::Uuid::new_v4()))
    }

    /// Unique temp file next to the artifact it will become.
    pub(crate) fn artifact_temp(&self, fingerprint: &str, extension: &str) -> PathBuf {
        self.root.join(format!(
            ".{fingerprint}{extension}.{}.merging",
            uuid::Uuid::new_v4()
        ))
    }

    /// Lists staged chunk files of `fingerprint`, sorted by numeric index.
    ///
    /// Returns `None` when the staging directory does not exist. Temp files
    /// and names that are not chunk keys of `fingerprint` are skipped.
    pub(crate) fn read_staged(&self, fingerprint: &str) -> io::Result<Option<Vec<(ChunkKey, PathBuf)>>> {
        let entries = match std::fs::read_dir(self.staging_dir(fingerprint)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut staged = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let Ok(key) = name.parse::<ChunkKey>() else {
                continue;
            };
            if key.fingerprint() == fingerprint {
                staged.push((key, entry.path()));
            }
        }
        staged.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Some(staged))
    }
}
