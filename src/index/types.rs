//! Core types for the vector index layer.

use std::fmt;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::index::kmeans::ClusteringError;

/// Default number of inverted-file cells probed per query.
pub const DEFAULT_NPROBE: usize = 6;
/// Default number of sub-vectors per embedding.
pub const DEFAULT_SUBVECTOR_COUNT: usize = 8;
/// Default bits per quantization code.
pub const DEFAULT_CODE_BITS: u8 = 8;

/// Dense internal identifier used by the index, distinct from catalog ids.
///
/// Allocated sequentially by [`crate::index::IdMap`]; never reused. Updates
/// assign a fresh NumericId so stale postings resolve to nothing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Encode, Decode,
)]
pub struct NumericId(pub u64);

impl NumericId {
    #[must_use]
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NumericId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated embedding dimension.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode,
)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Create a dimension, rejecting zero.
    pub fn new(dim: usize) -> Result<Self, VectorIndexError> {
        if dim == 0 {
            return Err(VectorIndexError::InvalidDimension(dim));
        }
        Ok(Self(dim))
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Check that a vector matches this dimension.
    pub fn validate(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.0 {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for VectorDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantization shape parameters, fixed at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct IndexParams {
    /// Number of sub-vectors the embedding is split into.
    pub subvectors: usize,
    /// Bits per code; bounds the per-sub-quantizer codebook at 2^bits.
    pub code_bits: u8,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            subvectors: DEFAULT_SUBVECTOR_COUNT,
            code_bits: DEFAULT_CODE_BITS,
        }
    }
}

/// Errors from index construction, training, and search.
#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Vector dimension must be greater than zero, got {0}")]
    InvalidDimension(usize),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error(
        "Dimension {dimension} is not divisible by {subvectors} sub-vectors\nSuggestion: Pick a sub-vector count that divides the embedding dimension"
    )]
    IndivisibleDimension { dimension: usize, subvectors: usize },

    #[error("Code bits must be between 1 and 8, got {0}")]
    InvalidCodeBits(u8),

    #[error("Cannot train on an empty vector set")]
    EmptyTraining,

    #[error("Index is not trained\nSuggestion: Train the index before adding or searching vectors")]
    NotTrained,

    #[error("Clustering failed: {0}")]
    Clustering(#[from] ClusteringError),
}
