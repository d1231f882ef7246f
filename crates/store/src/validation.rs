use chunkdrop_protocol::{ChunkKey, is_safe_extension};

use crate::StoreError;

const MAX_FINGERPRINT_LEN: usize = 128;

/// Validates a fingerprint before it becomes a path component.
///
/// Accepts 1..=128 ASCII characters from `[0-9A-Za-z_]`, which rules out
/// separators, `..`, NUL and anything that could escape the storage root.
pub fn validate_fingerprint(fingerprint: &str) -> Result<(), StoreError> {
    if fingerprint.is_empty() {
        return Err(StoreError::InvalidName("empty fingerprint".into()));
    }
    if fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err(StoreError::InvalidName(format!(
            "fingerprint longer than {MAX_FINGERPRINT_LEN} characters"
        )));
    }
    if !fingerprint
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(StoreError::InvalidName(format!(
            "fingerprint contains invalid characters: {fingerprint:?}"
        )));
    }
    Ok(())
}

/// Validates an extension before it becomes part of an artifact name.
///
/// Empty is allowed. Otherwise a `.` followed by 1..=31 characters from
/// `[0-9A-Za-z_-]`. Filenames go through
/// [`chunkdrop_protocol::storage_extension`] first, which maps anything else
/// to empty.
pub fn validate_extension(extension: &str) -> Result<(), StoreError> {
    if extension.is_empty() || is_safe_extension(extension) {
        return Ok(());
    }
    Err(StoreError::InvalidName(format!(
        "invalid extension: {extension:?}"
    )))
}

/// Checks that `key` is a valid chunk key of `fingerprint`.
pub fn validate_chunk_key(fingerprint: &str, key: &ChunkKey) -> Result<(), StoreError> {
    validate_fingerprint(fingerprint)?;
    if key.fingerprint() != fingerprint {
        return Err(StoreError::FingerprintMismatch {
            fingerprint: fingerprint.to_string(),
            key: key.to_string(),
        });
    }
    Ok(())
}
