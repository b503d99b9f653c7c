//! Binary file holding the full-precision embedding cache.
//!
//! Layout, all little-endian:
//! - magic `SFVC` (4 bytes)
//! - version u32
//! - dimension u32
//! - count u32
//! - count records of: entry id u32, then dimension f32 values
//!
//! Reads go through a memory map so loading a large cache avoids a
//! second buffer copy.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use memmap2::Mmap;

use crate::corpus::EntryId;
use crate::index::{EmbeddingCache, VectorDimension};
use crate::storage::SnapshotError;

const MAGIC: &[u8; 4] = b"SFVC";
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

/// Write the whole cache to `path`, replacing any previous file.
pub fn write_cache(path: &Path, cache: &EmbeddingCache) -> Result<(), SnapshotError> {
    let dimension = cache.dimension().get();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    writer.write_all(&(dimension as u32).to_le_bytes())?;
    writer.write_all(&(cache.len() as u32).to_le_bytes())?;

    // Sorted order keeps the file byte-stable for identical caches.
    let mut records: Vec<(EntryId, &[f32])> = cache.iter().collect();
    records.sort_by_key(|(id, _)| *id);
    for (id, vector) in records {
        writer.write_all(&id.get().to_le_bytes())?;
        for value in vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Memory-map and decode a cache file.
pub fn read_cache(path: &Path) -> Result<EmbeddingCache, SnapshotError> {
    if !path.exists() {
        return Err(SnapshotError::MissingSection {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    // Safety: the file is opened read-only and not truncated while mapped.
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < HEADER_SIZE {
        return Err(SnapshotError::InvalidFormat(
            "cache file shorter than header".to_string(),
        ));
    }
    if &mmap[0..4] != MAGIC {
        return Err(SnapshotError::InvalidFormat(
            "bad magic bytes in cache file".to_string(),
        ));
    }
    let version = read_u32(&mmap, 4);
    if version != FORMAT_VERSION {
        return Err(SnapshotError::VersionMismatch {
            expected: FORMAT_VERSION,
            actual: version,
        });
    }
    let dimension = read_u32(&mmap, 8) as usize;
    let count = read_u32(&mmap, 12) as usize;

    let record_size = 4 + dimension * 4;
    let expected_len = HEADER_SIZE + count * record_size;
    if mmap.len() != expected_len {
        return Err(SnapshotError::InvalidFormat(format!(
            "cache file length {} does not match header (expected {expected_len})",
            mmap.len()
        )));
    }

    let dim = VectorDimension::new(dimension)
        .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
    let mut cache = EmbeddingCache::new(dim);

    for record in 0..count {
        let offset = HEADER_SIZE + record * record_size;
        let raw_id = read_u32(&mmap, offset);
        let id = EntryId::new(raw_id).ok_or_else(|| {
            SnapshotError::InvalidFormat(format!("zero entry id in record {record}"))
        })?;
        let mut vector = Vec::with_capacity(dimension);
        for i in 0..dimension {
            let at = offset + 4 + i * 4;
            let bytes: [u8; 4] = mmap[at..at + 4].try_into().expect("bounded slice");
            vector.push(f32::from_le_bytes(bytes));
        }
        cache
            .insert(id, vector)
            .map_err(|e| SnapshotError::InvalidFormat(e.to_string()))?;
    }
    Ok(cache)
}

fn read_u32(data: &[u8], offset: usize) -> u32 {
    let bytes: [u8; 4] = data[offset..offset + 4].try_into().expect("bounded slice");
    u32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn eid(id: u32) -> EntryId {
        EntryId::new(id).unwrap()
    }

    #[test]
    fn round_trips_vectors() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.vec");

        let mut cache = EmbeddingCache::new(VectorDimension::new(3).unwrap());
        cache.insert(eid(5), vec![1.5, -2.0, 0.25]).unwrap();
        cache.insert(eid(2), vec![0.0, 3.5, -1.0]).unwrap();
        write_cache(&path, &cache).unwrap();

        let restored = read_cache(&path).unwrap();
        assert_eq!(restored.len(), 2);
        assert_eq!(restored.dimension().get(), 3);
        assert_eq!(restored.get(eid(5)), Some([1.5, -2.0, 0.25].as_slice()));
        assert_eq!(restored.get(eid(2)), Some([0.0, 3.5, -1.0].as_slice()));
    }

    #[test]
    fn empty_cache_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.vec");
        let cache = EmbeddingCache::new(VectorDimension::new(4).unwrap());
        write_cache(&path, &cache).unwrap();

        let restored = read_cache(&path).unwrap();
        assert!(restored.is_empty());
        assert_eq!(restored.dimension().get(), 4);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.vec");
        std::fs::write(&path, b"XXXX0000000000000000").unwrap();

        let err = read_cache(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFormat(_)));
    }

    #[test]
    fn rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.vec");

        let mut cache = EmbeddingCache::new(VectorDimension::new(3).unwrap());
        cache.insert(eid(1), vec![1.0, 2.0, 3.0]).unwrap();
        write_cache(&path, &cache).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = read_cache(&path).unwrap_err();
        assert!(matches!(err, SnapshotError::InvalidFormat(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = read_cache(&dir.path().join("absent.vec")).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingSection { .. }));
    }
}
