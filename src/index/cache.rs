//! Exact-lookup cache of full-precision embeddings, keyed by catalog id.
//!
//! Holds the authoritative vector for every live entry. The ANN index
//! stores lossy codes; rebuilds and exact-id lookups come from here.

use std::collections::HashMap;

use crate::corpus::EntryId;
use crate::index::types::{VectorDimension, VectorIndexError};

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dimension: VectorDimension,
    vectors: HashMap<EntryId, Vec<f32>>,
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Insert or replace the vector for an entry.
    pub fn insert(&mut self, id: EntryId, vector: Vec<f32>) -> Result<(), VectorIndexError> {
        self.dimension.validate(&vector)?;
        self.vectors.insert(id, vector);
        Ok(())
    }

    pub fn remove(&mut self, id: EntryId) -> Option<Vec<f32>> {
        self.vectors.remove(&id)
    }

    #[must_use]
    pub fn get(&self, id: EntryId) -> Option<&[f32]> {
        self.vectors.get(&id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, id: EntryId) -> bool {
        self.vectors.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &[f32])> {
        self.vectors.iter().map(|(&id, v)| (id, v.as_slice()))
    }
}
