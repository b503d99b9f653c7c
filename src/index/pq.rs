//! Product quantizer: splits embeddings into sub-vectors and encodes each
//! against a per-sub-quantizer codebook.
//!
//! Distances are computed asymmetrically: the full-precision query builds
//! per-sub-vector distance tables once, then every stored code costs `m`
//! table lookups.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::index::kmeans::{self, squared_euclidean};
use crate::index::types::{IndexParams, VectorDimension, VectorIndexError};

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct ProductQuantizer {
    dimension: VectorDimension,
    subvectors: usize,
    sub_dim: usize,
    /// `subvectors` codebooks, each `codebook_len` centroids of `sub_dim`.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Train codebooks over the given vectors.
    ///
    /// Each sub-quantizer gets `min(2^code_bits, n)` centroids so small
    /// collections still train. The seed keeps training reproducible.
    pub fn train(
        vectors: &[Vec<f32>],
        dimension: VectorDimension,
        params: IndexParams,
        seed: u64,
    ) -> Result<Self, VectorIndexError> {
        if vectors.is_empty() {
            return Err(VectorIndexError::EmptyTraining);
        }
        if params.code_bits == 0 || params.code_bits > 8 {
            return Err(VectorIndexError::InvalidCodeBits(params.code_bits));
        }
        if params.subvectors == 0 || dimension.get() % params.subvectors != 0 {
            return Err(VectorIndexError::IndivisibleDimension {
                dimension: dimension.get(),
                subvectors: params.subvectors,
            });
        }
        for vector in vectors {
            dimension.validate(vector)?;
        }

        let sub_dim = dimension.get() / params.subvectors;
        let codebook_len = (1usize << params.code_bits).min(vectors.len());

        let mut codebooks = Vec::with_capacity(params.subvectors);
        for sub in 0..params.subvectors {
            let start = sub * sub_dim;
            let slices: Vec<Vec<f32>> = vectors
                .iter()
                .map(|v| v[start..start + sub_dim].to_vec())
                .collect();
            // Offset the seed per sub-quantizer so codebooks differ.
            let result = kmeans::kmeans(&slices, codebook_len, seed.wrapping_add(sub as u64))?;
            codebooks.push(result.centroids);
        }

        Ok(Self {
            dimension,
            subvectors: params.subvectors,
            sub_dim,
            codebooks,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn subvectors(&self) -> usize {
        self.subvectors
    }

    /// Centroids per sub-quantizer.
    #[must_use]
    pub fn codebook_len(&self) -> usize {
        self.codebooks.first().map_or(0, Vec::len)
    }

    /// Encode a vector as `subvectors` codebook indices.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>, VectorIndexError> {
        self.dimension.validate(vector)?;
        let mut codes = Vec::with_capacity(self.subvectors);
        for (sub, codebook) in self.codebooks.iter().enumerate() {
            let start = sub * self.sub_dim;
            let slice = &vector[start..start + self.sub_dim];
            let (idx, _) = kmeans::nearest_centroid(slice, codebook);
            codes.push(idx as u8);
        }
        Ok(codes)
    }

    /// Build per-sub-vector distance tables for a query.
    ///
    /// `tables[sub][code]` is the squared distance between the query's
    /// sub-vector and that codebook centroid.
    pub fn distance_tables(&self, query: &[f32]) -> Result<Vec<Vec<f32>>, VectorIndexError> {
        self.dimension.validate(query)?;
        let mut tables = Vec::with_capacity(self.subvectors);
        for (sub, codebook) in self.codebooks.iter().enumerate() {
            let start = sub * self.sub_dim;
            let slice = &query[start..start + self.sub_dim];
            tables.push(
                codebook
                    .iter()
                    .map(|centroid| squared_euclidean(slice, centroid))
                    .collect(),
            );
        }
        Ok(tables)
    }

    /// Approximate squared distance of stored codes from the tabled query.
    #[must_use]
    pub fn approx_distance(tables: &[Vec<f32>], codes: &[u8]) -> f32 {
        tables
            .iter()
            .zip(codes.iter())
            .map(|(table, &code)| table[code as usize])
            .sum()
    }
}
