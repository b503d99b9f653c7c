//! Error types for the retrieval service.
//!
//! Follows a layered design: low-level index and snapshot errors carry
//! their own enums and are wrapped by [`SearchError`] at the service
//! boundary. Validation variants keep stable, user-facing messages so
//! callers can surface them directly.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::corpus::EntryId;
use crate::index::VectorIndexError;
use crate::storage::SnapshotError;

/// Service-level errors returned by query and mutation operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Query text was empty or whitespace-only. Message is stable.
    #[error("Query string cannot be empty.")]
    EmptyQuery,

    /// Requested result count was zero. Message is stable.
    #[error("Search radius must be an integer greater than 0.")]
    InvalidK,

    /// The service has not finished building or loading its index.
    #[error("Search index is not initialized\nSuggestion: Run the build command first or wait for the corpus to appear")]
    Uninitialized,

    /// A mutation referenced a catalog identifier that does not exist.
    #[error("Entry {id} not found in the catalog")]
    EntryNotFound { id: EntryId },

    /// The corpus file is absent at the configured path.
    #[error("Corpus file not found: {path}\nSuggestion: Check the corpus.path setting or run preprocessing to produce the file")]
    CorpusMissing { path: PathBuf },

    /// The corpus file exists but its content cannot be interpreted.
    #[error("Corpus format error: {reason}")]
    CorpusFormat { reason: String },

    /// Settings could not be read or merged.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An embedding did not match the index dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding model failed to produce vectors.
    #[error("Embedding generation failed: {0}")]
    Encoding(String),

    /// A bounded wait for the corpus was cancelled before it appeared.
    #[error("Wait for corpus was cancelled")]
    WaitCancelled,

    /// Error from the vector index layer.
    #[error("Index error: {0}")]
    Index(#[from] VectorIndexError),

    /// Error while persisting or loading a snapshot.
    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    /// Underlying I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SearchError {
    /// Stable machine-readable code for logs and exit reporting.
    #[must_use]
    pub fn status_code(&self) -> &'static str {
        match self {
            Self::EmptyQuery | Self::InvalidK => "VALIDATION_ERROR",
            Self::Uninitialized => "UNINITIALIZED",
            Self::EntryNotFound { .. } => "NOT_FOUND",
            Self::CorpusMissing { .. } | Self::CorpusFormat { .. } => "CORPUS_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::DimensionMismatch { .. } => "DIMENSION_MISMATCH",
            Self::Encoding(_) => "ENCODING_ERROR",
            Self::WaitCancelled => "WAIT_CANCELLED",
            Self::Index(_) => "INDEX_ERROR",
            Self::Snapshot(_) => "SNAPSHOT_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for service operations.
pub type SearchResult<T> = Result<T, SearchError>;
