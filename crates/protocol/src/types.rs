use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Storage key of one staged chunk: `<fingerprint>-<index>`.
///
/// The index is always compared numerically, so `fp-2` sorts before `fp-10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChunkKey {
    fingerprint: String,
    index: u64,
}

impl ChunkKey {
    pub fn new(fingerprint: impl Into<String>, index: u64) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            index,
        }
    }

    /// Parses a key of the form `<fingerprint>-<index>`.
    ///
    /// The index must be a canonical decimal number (no sign, no leading
    /// zeros) so that parsing and formatting round-trip to the same name.
    pub fn parse(key: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidChunkKey(key.to_string());

        let (fingerprint, index) = key.rsplit_once('-').ok_or_else(invalid)?;
        if fingerprint.is_empty() || index.is_empty() {
            return Err(invalid());
        }
        if !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if index.len() > 1 && index.starts_with('0') {
            return Err(invalid());
        }
        let index = index.parse::<u64>().map_err(|_| invalid())?;

        Ok(Self::new(fingerprint, index))
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn index(&self) -> u64 {
        self.index
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.fingerprint, self.index)
    }
}

impl FromStr for ChunkKey {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChunkKey {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChunkKey> for String {
    fn from(key: ChunkKey) -> Self {
        key.to_string()
    }
}

impl Ord for ChunkKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fingerprint
            .cmp(&other.fingerprint)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for ChunkKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the extension of `filename`, including the leading dot.
///
/// Names without a dot have an empty extension.
pub fn extract_extension(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(pos) => &filename[pos..],
        None => "",
    }
}

/// Longest extension, dot included, kept in a storage name.
pub const MAX_EXTENSION_LEN: usize = 32;

/// Returns `true` if `extension` can be part of a storage name: a `.`
/// followed by 1..=31 characters from `[0-9A-Za-z_-]`.
pub fn is_safe_extension(extension: &str) -> bool {
    let Some(rest) = extension.strip_prefix('.') else {
        return false;
    };
    !rest.is_empty()
        && extension.len() <= MAX_EXTENSION_LEN
        && rest
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Extension used for the stored artifact of `filename`.
///
/// The extension of [`extract_extension`] when it is safe, otherwise empty.
pub fn storage_extension(filename: &str) -> &str {
    let extension = extract_extension(filename);
    if is_safe_extension(extension) {
        extension
    } else {
        ""
    }
}

/// Outcome of a merge request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MergeStatus {
    /// Chunks were assembled into the final artifact.
    Success,
    /// The final artifact already existed; nothing was done.
    AlreadyMerged,
    /// No staged chunks and no final artifact.
    StagingMissing,
    /// Some expected chunk indices are not staged.
    IncompleteChunks,
    /// Staged chunks did not fit the requested layout and were removed.
    /// Every chunk has to be sent again.
    StagingDiscarded,
    /// Any other server-side failure.
    Failed,
}

impl MergeStatus {
    /// Returns `true` if the final artifact exists after the request.
    pub fn is_success(self) -> bool {
        matches!(self, MergeStatus::Success | MergeStatus::AlreadyMerged)
    }
}
