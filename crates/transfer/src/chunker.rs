use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::Path;

use chunkdrop_protocol::ChunkKey;
use sha2::{Digest, Sha256};

use crate::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CHUNK_COUNT, TransferError};

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

// ---------------------------------------------------------------------------
// Chunk size policy
// ---------------------------------------------------------------------------

/// Chooses the chunk size for a file.
///
/// Files small enough to fit in `max_chunk_count` chunks of `chunk_size`
/// use `chunk_size`; bigger files use `ceil(total_size / max_chunk_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub chunk_size: u64,
    pub max_chunk_count: u64,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunk_count: DEFAULT_MAX_CHUNK_COUNT,
        }
    }
}

impl ChunkPolicy {
    /// A policy that always uses `chunk_size`.
    pub fn fixed(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            max_chunk_count: 0,
        }
    }

    /// Returns the chunk size to use for a file of `total_size` bytes.
    pub fn chunk_size_for(&self, total_size: u64) -> Result<u64, TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(0));
        }
        if self.max_chunk_count == 0 {
            return Ok(self.chunk_size);
        }
        Ok(self
            .chunk_size
            .max(total_size.div_ceil(self.max_chunk_count)))
    }

    /// Builds the layout of a file of `total_size` bytes under this policy.
    pub fn layout_for(&self, total_size: u64) -> Result<ChunkLayout, TransferError> {
        ChunkLayout::new(total_size, self.chunk_size_for(total_size)?)
    }
}

// ---------------------------------------------------------------------------
// ChunkLayout
// ---------------------------------------------------------------------------

/// Byte ranges of every chunk of a file.
///
/// Chunk `i` covers `[i * chunk_size, min((i + 1) * chunk_size, total_size))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    total_size: u64,
    chunk_size: u64,
}

impl ChunkLayout {
    pub fn new(total_size: u64, chunk_size: u64) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidChunkSize(chunk_size));
        }
        Ok(Self {
            total_size,
            chunk_size,
        })
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks. Zero for an empty file.
    pub fn chunk_count(&self) -> u64 {
        self.total_size.div_ceil(self.chunk_size)
    }

    /// All chunk indices in order.
    pub fn indices(&self) -> Range<u64> {
        0..self.chunk_count()
    }

    /// Byte range of chunk `index`, or `None` past the last chunk.
    pub fn range(&self, index: u64) -> Option<Range<u64>> {
        if index >= self.chunk_count() {
            return None;
        }
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        Some(start..end)
    }

    /// Iterates `(index, range)` pairs in file order.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, Range<u64>)> + '_ {
        self.indices()
            .filter_map(move |index| self.range(index).map(|r| (index, r)))
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// One chunk of file data read from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u64,
    /// Byte offset of `data` within the file.
    pub offset: u64,
    pub data: Vec<u8>,
}

impl Chunk {
    /// End of the chunk's byte range (exclusive).
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    /// Storage key of this chunk for the file identified by `fingerprint`.
    pub fn key(&self, fingerprint: &str) -> ChunkKey {
        ChunkKey::new(fingerprint, self.index)
    }

    /// SHA-256 hex digest of the payload.
    pub fn checksum(&self) -> String {
        checksum_bytes(&self.data)
    }
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Opens `path` and returns a lazy, in-order chunk sequence over it.
pub fn split(path: &Path, chunk_size: u64) -> Result<ChunkReader, TransferError> {
    ChunkReader::open(path, chunk_size)
}

/// Reads a file chunk by chunk; only the current chunk is held in memory.
///
/// Reading can start or restart at any index.
pub struct ChunkReader {
    file: File,
    layout: ChunkLayout,
    next_index: u64,
}

impl ChunkReader {
    /// Opens `path`, deriving the layout from its current size.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        let total_size = file.metadata()?.len();
        let layout = ChunkLayout::new(total_size, chunk_size)?;
        Ok(Self {
            file,
            layout,
            next_index: 0,
        })
    }

    /// Opens `path` with a precomputed layout.
    ///
    /// A file shorter than the layout surfaces as a read error on the
    /// first chunk that runs past its end.
    pub fn with_layout(path: &Path, layout: ChunkLayout) -> Result<Self, TransferError> {
        let file = File::open(path)?;
        Ok(Self {
            file,
            layout,
            next_index: 0,
        })
    }

    pub fn layout(&self) -> ChunkLayout {
        self.layout
    }

    /// Index returned by the next call to [`next_chunk`](Self::next_chunk).
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// Repositions the sequence so the next chunk read is `index`.
    pub fn seek_to_index(&mut self, index: u64) -> Result<(), TransferError> {
        let count = self.layout.chunk_count();
        if index > count {
            return Err(TransferError::IndexOutOfRange { index, count });
        }
        self.next_index = index;
        Ok(())
    }

    /// Reads chunk `index` and positions the sequence right after it.
    pub fn read_chunk(&mut self, index: u64) -> Result<Chunk, TransferError> {
        let range = self
            .layout
            .range(index)
            .ok_or(TransferError::IndexOutOfRange {
                index,
                count: self.layout.chunk_count(),
            })?;

        let mut data = vec![0u8; (range.end - range.start) as usize];
        self.file
            .seek(SeekFrom::Start(range.start))
            .and_then(|_| self.file.read_exact(&mut data))
            .map_err(|source| TransferError::Read { index, source })?;

        self.next_index = index + 1;
        Ok(Chunk {
            index,
            offset: range.start,
            data,
        })
    }

    /// Reads the next chunk. Returns `None` after the last one.
    pub fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        if self.next_index >= self.layout.chunk_count() {
            return Ok(None);
        }
        self.read_chunk(self.next_index).map(Some)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    #[test]
    fn checksum_bytes_is_sha256_hex() {
        assert_eq!(
            checksum_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn layout_counts_partial_last_chunk() {
        let mib = 1024 * 1024;
        let layout = ChunkLayout::new(5 * mib / 2, mib).unwrap();
        assert_eq!(layout.chunk_count(), 3);
        assert_eq!(layout.range(0), Some(0..mib));
        assert_eq!(layout.range(1), Some(mib..2 * mib));
        assert_eq!(layout.range(2), Some(2 * mib..5 * mib / 2));
        assert_eq!(layout.range(3), None);
    }

    #[test]
    fn layout_exact_multiple() {
        let layout = ChunkLayout::new(8, 4).unwrap();
        assert_eq!(layout.chunk_count(), 2);
        assert_eq!(layout.range(1), Some(4..8));
    }

    #[test]
    fn layout_empty_file_has_no_chunks() {
        let layout = ChunkLayout::new(0, 4).unwrap();
        assert_eq!(layout.chunk_count(), 0);
        assert_eq!(layout.ranges().count(), 0);
    }

    #[test]
    fn layout_rejects_zero_chunk_size() {
        assert!(matches!(
            ChunkLayout::new(10, 0),
            Err(TransferError::InvalidChunkSize(0))
        ));
    }

    #[test]
    fn layout_ranges_cover_file() {
        let layout = ChunkLayout::new(10, 3).unwrap();
        let ranges: Vec<_> = layout.ranges().collect();
        assert_eq!(ranges, vec![(0, 0..3), (1, 3..6), (2, 6..9), (3, 9..10)]);
    }

    #[test]
    fn policy_uses_fixed_size_for_small_files() {
        let policy = ChunkPolicy {
            chunk_size: 4,
            max_chunk_count: 10,
        };
        assert_eq!(policy.chunk_size_for(40).unwrap(), 4);
        assert_eq!(policy.chunk_size_for(0).unwrap(), 4);
    }

    #[test]
    fn policy_bounds_chunk_count_for_large_files() {
        let policy = ChunkPolicy {
            chunk_size: 4,
            max_chunk_count: 10,
        };
        assert_eq!(policy.chunk_size_for(41).unwrap(), 5);
        let layout = policy.layout_for(1000).unwrap();
        assert_eq!(layout.chunk_size(), 100);
        assert!(layout.chunk_count() <= 10);
    }

    #[test]
    fn policy_fixed_ignores_size() {
        let policy = ChunkPolicy::fixed(7);
        assert_eq!(policy.chunk_size_for(u64::MAX).unwrap(), 7);
    }

    #[test]
    fn policy_rejects_zero() {
        assert!(ChunkPolicy::fixed(0).chunk_size_for(1).is_err());
    }

    #[test]
    fn chunk_reader_reads_all() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"AABBCCDDEE");

        let mut reader = split(&path, 4).unwrap();
        assert_eq!(reader.layout().total_size(), 10);

        let c1 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c1.index, c1.offset, c1.data.as_slice()), (0, 0, &b"AABB"[..]));

        let c2 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c2.index, c2.offset, c2.data.as_slice()), (1, 4, &b"CCDD"[..]));

        let c3 = reader.next_chunk().unwrap().unwrap();
        assert_eq!((c3.index, c3.offset, c3.data.as_slice()), (2, 8, &b"EE"[..]));
        assert_eq!(c3.end(), 10);

        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_restarts_at_index() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::open(&path, 4).unwrap();
        reader.seek_to_index(1).unwrap();
        let c = reader.next_chunk().unwrap().unwrap();
        assert_eq!(&c.data, b"4567");
        assert_eq!(reader.next_index(), 2);

        reader.seek_to_index(0).unwrap();
        assert_eq!(&reader.next_chunk().unwrap().unwrap().data, b"0123");
    }

    #[test]
    fn chunk_reader_random_access() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let mut reader = ChunkReader::open(&path, 3).unwrap();
        assert_eq!(&reader.read_chunk(3).unwrap().data, b"9");
        assert_eq!(&reader.read_chunk(1).unwrap().data, b"345");
        assert!(matches!(
            reader.read_chunk(4),
            Err(TransferError::IndexOutOfRange { index: 4, count: 4 })
        ));
    }

    #[test]
    fn chunk_reader_seek_past_end_rejected() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123");
        let mut reader = ChunkReader::open(&path, 2).unwrap();
        assert!(reader.seek_to_index(2).is_ok());
        assert!(reader.next_chunk().unwrap().is_none());
        assert!(reader.seek_to_index(3).is_err());
    }

    #[test]
    fn chunk_reader_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "empty.bin", b"");
        let mut reader = ChunkReader::open(&path, 4).unwrap();
        assert!(reader.next_chunk().unwrap().is_none());
    }

    #[test]
    fn chunk_reader_iterator() {
        let dir = TempDir::new().unwrap();
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let path = create_test_file(dir.path(), "test.bin", &data);

        let chunks: Vec<Chunk> = split(&path, 64).unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(chunks.len(), 16);
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(joined, data);
    }

    #[test]
    fn chunk_reader_reports_short_file() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "short.bin", b"0123");
        let layout = ChunkLayout::new(10, 4).unwrap();
        let mut reader = ChunkReader::with_layout(&path, layout).unwrap();

        assert!(reader.next_chunk().is_ok());
        assert!(matches!(
            reader.next_chunk(),
            Err(TransferError::Read { index: 1, .. })
        ));
    }

    #[test]
    fn chunk_key_and_checksum() {
        let chunk = Chunk {
            index: 3,
            offset: 12,
            data: b"abc".to_vec(),
        };
        assert_eq!(chunk.key("ff").to_string(), "ff-3");
        assert_eq!(chunk.checksum(), checksum_bytes(b"abc"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            ChunkReader::open(&dir.path().join("nope"), 4),
            Err(TransferError::Io(_))
        ));
    }
}
