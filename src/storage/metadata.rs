//! Snapshot metadata: the version gate read before any other section.

use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::storage::SnapshotError;

/// Current snapshot format version. Bump on any incompatible layout
/// change; older snapshots are rejected, not migrated.
pub const SNAPSHOT_VERSION: u32 = 1;

pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub model_name: String,
    pub embedding_dimension: usize,
    pub entry_count: usize,
    pub created_at: u64,
    pub updated_at: u64,
}

impl SnapshotMetadata {
    #[must_use]
    pub fn new(model_name: String, embedding_dimension: usize, entry_count: usize) -> Self {
        let now = unix_timestamp();
        Self {
            version: SNAPSHOT_VERSION,
            model_name,
            embedding_dimension,
            entry_count,
            created_at: now,
            updated_at: now,
        }
    }

    /// Refresh counters before re-saving an existing snapshot.
    pub fn touch(&mut self, entry_count: usize) {
        self.entry_count = entry_count;
        self.updated_at = unix_timestamp();
    }

    pub fn save(&self, dir: &Path) -> Result<(), SnapshotError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(METADATA_FILE), json)?;
        Ok(())
    }

    /// Load and gate on the format version.
    pub fn load(dir: &Path) -> Result<Self, SnapshotError> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(SnapshotError::MissingSection { path });
        }
        let json = fs::read_to_string(&path)?;
        let metadata: Self = serde_json::from_str(&json)?;
        if metadata.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                actual: metadata.version,
            });
        }
        Ok(metadata)
    }

    #[must_use]
    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let meta = SnapshotMetadata::new("AllMiniLML6V2".into(), 384, 1000);
        meta.save(dir.path()).unwrap();

        assert!(SnapshotMetadata::exists(dir.path()));
        let loaded = SnapshotMetadata::load(dir.path()).unwrap();
        assert_eq!(loaded.version, SNAPSHOT_VERSION);
        assert_eq!(loaded.model_name, "AllMiniLML6V2");
        assert_eq!(loaded.embedding_dimension, 384);
        assert_eq!(loaded.entry_count, 1000);
    }

    #[test]
    fn future_version_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut meta = SnapshotMetadata::new("m".into(), 8, 1);
        meta.version = SNAPSHOT_VERSION + 1;
        let json = serde_json::to_string(&meta).unwrap();
        fs::write(dir.path().join(METADATA_FILE), json).unwrap();

        let err = SnapshotMetadata::load(dir.path()).unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        assert!(!SnapshotMetadata::exists(dir.path()));
        let err = SnapshotMetadata::load(dir.path()).unwrap_err();
        assert!(matches!(err, SnapshotError::MissingSection { .. }));
    }
}
