//! Versioned on-disk snapshots of the service state.
//!
//! A snapshot is a directory of five sections: `metadata.json` (format
//! gate), `table.json` (entries and tombstones), `idmap.json`,
//! `index.bin` (bincode IVF-PQ structure), and `cache.vec` (binary
//! full-precision vectors, memory-mapped on read).

pub mod cache_file;
pub mod metadata;
pub mod snapshot;

pub use metadata::SnapshotMetadata;
pub use snapshot::{LoadedSnapshot, Snapshot};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors while persisting or loading snapshots.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Snapshot section missing: {path}")]
    MissingSection { path: PathBuf },

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),

    #[error(
        "Snapshot version mismatch: expected {expected}, found {actual}\nSuggestion: Delete the snapshot directory and rebuild from the corpus"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}
