//! Snapshot directory: save and load the full service state.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::corpus::{Entry, EntryId};
use crate::index::id_map::{IdMap, IdMapData};
use crate::index::{EmbeddingCache, IvfPqIndex};
use crate::storage::metadata::SnapshotMetadata;
use crate::storage::{SnapshotError, cache_file};

const TABLE_FILE: &str = "table.json";
const IDMAP_FILE: &str = "idmap.json";
const INDEX_FILE: &str = "index.bin";
const CACHE_FILE: &str = "cache.vec";

/// Entries and tombstones, stored together as one JSON section.
#[derive(Debug, Serialize, Deserialize)]
struct TableSection {
    entries: Vec<Entry>,
    tombstones: Vec<EntryId>,
}

/// Everything needed to reconstruct a service from disk.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub metadata: SnapshotMetadata,
    pub entries: Vec<Entry>,
    pub tombstones: HashSet<EntryId>,
    pub id_map: IdMap,
    pub index: IvfPqIndex,
    pub cache: EmbeddingCache,
}

/// Handle to a snapshot directory.
pub struct Snapshot {
    base: PathBuf,
}

impl Snapshot {
    #[must_use]
    pub fn new(base: PathBuf) -> Self {
        Self { base }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.base
    }

    /// A snapshot exists when its metadata gate file does.
    #[must_use]
    pub fn exists(&self) -> bool {
        SnapshotMetadata::exists(&self.base)
    }

    /// Remove the snapshot directory and all sections.
    pub fn clear(&self) -> Result<(), SnapshotError> {
        if self.base.exists() {
            fs::remove_dir_all(&self.base)?;
        }
        Ok(())
    }

    /// Write all five sections. Metadata goes last so a crash mid-save
    /// leaves no gate file and the partial snapshot is ignored.
    pub fn save(
        &self,
        model_name: &str,
        entries: &[Entry],
        tombstones: &HashSet<EntryId>,
        id_map: &IdMap,
        index: &IvfPqIndex,
        cache: &EmbeddingCache,
    ) -> Result<(), SnapshotError> {
        fs::create_dir_all(&self.base)?;

        let table = TableSection {
            entries: entries.to_vec(),
            tombstones: {
                let mut ids: Vec<EntryId> = tombstones.iter().copied().collect();
                ids.sort_unstable();
                ids
            },
        };
        fs::write(
            self.base.join(TABLE_FILE),
            serde_json::to_string(&table)?,
        )?;

        fs::write(
            self.base.join(IDMAP_FILE),
            serde_json::to_string(&id_map.to_data())?,
        )?;

        let encoded = bincode::encode_to_vec(index, bincode::config::standard())?;
        fs::write(self.base.join(INDEX_FILE), encoded)?;

        cache_file::write_cache(&self.base.join(CACHE_FILE), cache)?;

        let mut metadata = match SnapshotMetadata::load(&self.base) {
            Ok(existing) => existing,
            Err(_) => SnapshotMetadata::new(
                model_name.to_string(),
                cache.dimension().get(),
                entries.len(),
            ),
        };
        metadata.touch(entries.len());
        metadata.save(&self.base)?;

        info!(
            path = %self.base.display(),
            entries = entries.len(),
            "saved snapshot"
        );
        Ok(())
    }

    /// Load and cross-check all sections.
    pub fn load(&self) -> Result<LoadedSnapshot, SnapshotError> {
        let metadata = SnapshotMetadata::load(&self.base)?;

        let table_path = self.base.join(TABLE_FILE);
        if !table_path.exists() {
            return Err(SnapshotError::MissingSection { path: table_path });
        }
        let table: TableSection = serde_json::from_str(&fs::read_to_string(&table_path)?)?;

        let idmap_path = self.base.join(IDMAP_FILE);
        if !idmap_path.exists() {
            return Err(SnapshotError::MissingSection { path: idmap_path });
        }
        let id_map_data: IdMapData = serde_json::from_str(&fs::read_to_string(&idmap_path)?)?;
        let id_map = IdMap::from(id_map_data);

        let index_path = self.base.join(INDEX_FILE);
        if !index_path.exists() {
            return Err(SnapshotError::MissingSection { path: index_path });
        }
        let bytes = fs::read(&index_path)?;
        let (index, _): (IvfPqIndex, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())?;

        let cache = cache_file::read_cache(&self.base.join(CACHE_FILE))?;

        if cache.dimension().get() != metadata.embedding_dimension
            || index.dimension().get() != metadata.embedding_dimension
        {
            return Err(SnapshotError::InvalidFormat(format!(
                "dimension disagreement: metadata {}, index {}, cache {}",
                metadata.embedding_dimension,
                index.dimension(),
                cache.dimension()
            )));
        }

        info!(
            path = %self.base.display(),
            entries = table.entries.len(),
            "loaded snapshot"
        );

        Ok(LoadedSnapshot {
            metadata,
            entries: table.entries,
            tombstones: table.tombstones.into_iter().collect(),
            id_map,
            index,
            cache,
        })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::index::{IndexParams, NumericId, VectorDimension};

    use super::*;

    fn eid(id: u32) -> EntryId {
        EntryId::new(id).unwrap()
    }

    fn entry(id: u32) -> Entry {
        Entry::new(
            eid(id),
            format!("title {id}"),
            format!("desc {id}"),
            "facts".into(),
            "brand".into(),
            "red".into(),
            "us".into(),
        )
    }

    fn build_state() -> (Vec<Entry>, HashSet<EntryId>, IdMap, IvfPqIndex, EmbeddingCache) {
        let dim = VectorDimension::new(2).unwrap();
        let params = IndexParams {
            subvectors: 2,
            code_bits: 8,
        };
        let entries = vec![entry(1), entry(2), entry(3)];
        let vectors = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![2.0, 2.0]];

        let mut id_map = IdMap::new();
        let mut index = IvfPqIndex::new(dim, params).unwrap();
        index.train(&vectors, false).unwrap();
        let mut cache = EmbeddingCache::new(dim);
        for (e, v) in entries.iter().zip(vectors.iter()) {
            let nid = id_map.allocate(e.id);
            index.add(nid, v).unwrap();
            cache.insert(e.id, v.clone()).unwrap();
        }
        let mut tombstones = HashSet::new();
        tombstones.insert(eid(2));
        (entries, tombstones, id_map, index, cache)
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));
        assert!(!snapshot.exists());

        let (entries, tombstones, id_map, index, cache) = build_state();
        snapshot
            .save("mock", &entries, &tombstones, &id_map, &index, &cache)
            .unwrap();
        assert!(snapshot.exists());

        let loaded = snapshot.load().unwrap();
        assert_eq!(loaded.metadata.model_name, "mock");
        assert_eq!(loaded.metadata.embedding_dimension, 2);
        assert_eq!(loaded.entries.len(), 3);
        assert!(loaded.tombstones.contains(&eid(2)));
        assert_eq!(loaded.id_map.numeric(eid(3)), Some(NumericId(2)));
        assert!(loaded.index.is_trained());
        assert_eq!(loaded.cache.len(), 3);
    }

    #[test]
    fn save_preserves_created_at() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));
        let (entries, tombstones, id_map, index, cache) = build_state();

        snapshot
            .save("mock", &entries, &tombstones, &id_map, &index, &cache)
            .unwrap();
        let first = snapshot.load().unwrap().metadata;

        snapshot
            .save("mock", &entries[..2], &tombstones, &id_map, &index, &cache)
            .unwrap();
        let second = snapshot.load().unwrap().metadata;

        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.entry_count, 2);
    }

    #[test]
    fn missing_section_is_reported() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));
        let (entries, tombstones, id_map, index, cache) = build_state();
        snapshot
            .save("mock", &entries, &tombstones, &id_map, &index, &cache)
            .unwrap();

        fs::remove_file(snapshot.path().join(INDEX_FILE)).unwrap();
        let err = snapshot.load().unwrap_err();
        assert!(matches!(err, SnapshotError::MissingSection { .. }));
    }

    #[test]
    fn clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let snapshot = Snapshot::new(dir.path().join("index"));
        let (entries, tombstones, id_map, index, cache) = build_state();
        snapshot
            .save("mock", &entries, &tombstones, &id_map, &index, &cache)
            .unwrap();

        snapshot.clear().unwrap();
        assert!(!snapshot.exists());
        assert!(!snapshot.path().exists());
    }
}
