//! Vector index layer: IVF-PQ structure, k-means training, identifier
//! mapping, and the exact-lookup embedding cache.

pub mod cache;
pub mod id_map;
pub mod ivf;
pub mod kmeans;
pub mod pq;
pub mod types;

pub use cache::EmbeddingCache;
pub use id_map::IdMap;
pub use ivf::IvfPqIndex;
pub use pq::ProductQuantizer;
pub use types::{IndexParams, NumericId, VectorDimension, VectorIndexError};
