//! Semantic product retrieval over a quantized inverted-file vector index.
//!
//! The crate loads a cleaned product catalog, encodes each entry into a
//! fixed-dimension embedding, and serves approximate nearest-neighbor
//! queries from an IVF-PQ structure kept consistent with an exact-lookup
//! embedding cache under incremental updates and removals.

pub mod config;
pub mod corpus;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod service;
pub mod storage;

// Explicit exports for better API clarity
pub use config::Settings;
pub use corpus::{Entry, EntryId, load_entries};
pub use embedding::{EmbeddingEncoder, FastEmbedEncoder};
pub use error::{SearchError, SearchResult};
pub use index::{EmbeddingCache, IdMap, IvfPqIndex, NumericId, VectorDimension};
pub use lifecycle::{CancelHandle, CancelToken, ServiceCell};
pub use service::{CatalogSearchService, MatchSource, SearchMatch};
pub use storage::Snapshot;
