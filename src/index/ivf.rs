//! Inverted-file index with product-quantized postings.
//!
//! Vectors are bucketed by their nearest coarse centroid; a query probes
//! only the `nprobe` nearest cells and scores their codes against
//! precomputed distance tables. Ties break on the numeric identifier so
//! result order is deterministic.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::index::kmeans::{self, squared_euclidean};
use crate::index::pq::ProductQuantizer;
use crate::index::types::{IndexParams, NumericId, VectorDimension, VectorIndexError};

/// Seed for coarse and codebook training; fixed so retraining the same
/// vectors reproduces the same index.
const TRAIN_SEED: u64 = 0x5f3759df;

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
struct Posting {
    id: NumericId,
    codes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
struct TrainedState {
    coarse_centroids: Vec<Vec<f32>>,
    quantizer: ProductQuantizer,
    cells: Vec<Vec<Posting>>,
}

/// IVF-PQ approximate nearest-neighbor index over squared Euclidean
/// distance.
#[derive(Debug, Clone, Serialize, Deserialize, Encode, Decode)]
pub struct IvfPqIndex {
    dimension: VectorDimension,
    params: IndexParams,
    trained: Option<TrainedState>,
}

impl IvfPqIndex {
    /// Create an untrained index.
    pub fn new(dimension: VectorDimension, params: IndexParams) -> Result<Self, VectorIndexError> {
        if params.code_bits == 0 || params.code_bits > 8 {
            return Err(VectorIndexError::InvalidCodeBits(params.code_bits));
        }
        if params.subvectors == 0 || dimension.get() % params.subvectors != 0 {
            return Err(VectorIndexError::IndivisibleDimension {
                dimension: dimension.get(),
                subvectors: params.subvectors,
            });
        }
        Ok(Self {
            dimension,
            params,
            trained: None,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.trained.is_some()
    }

    /// Number of stored postings, including any stale ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.trained
            .as_ref()
            .map_or(0, |t| t.cells.iter().map(Vec::len).sum())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of inverted-file cells; zero before training.
    #[must_use]
    pub fn cell_count(&self) -> usize {
        self.trained.as_ref().map_or(0, |t| t.cells.len())
    }

    /// Train the coarse centroids and codebooks.
    ///
    /// A no-op when already trained unless `force` is set, in which case
    /// existing postings are discarded. The cell count scales with the
    /// training-set size as `max(1, floor(sqrt(n)))`, capped at `n`.
    pub fn train(&mut self, vectors: &[Vec<f32>], force: bool) -> Result<(), VectorIndexError> {
        if self.trained.is_some() && !force {
            return Ok(());
        }
        if vectors.is_empty() {
            return Err(VectorIndexError::EmptyTraining);
        }
        for vector in vectors {
            self.dimension.validate(vector)?;
        }

        let nlist = cell_count_for(vectors.len());
        let coarse = kmeans::kmeans(vectors, nlist, TRAIN_SEED)?;
        let quantizer = ProductQuantizer::train(vectors, self.dimension, self.params, TRAIN_SEED)?;

        debug!(
            vectors = vectors.len(),
            cells = nlist,
            codebook = quantizer.codebook_len(),
            "trained ivf-pq index"
        );

        self.trained = Some(TrainedState {
            coarse_centroids: coarse.centroids,
            quantizer,
            cells: vec![Vec::new(); nlist],
        });
        Ok(())
    }

    /// Quantize and store a vector under `id`.
    pub fn add(&mut self, id: NumericId, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.dimension.validate(vector)?;
        let state = self.trained.as_mut().ok_or(VectorIndexError::NotTrained)?;
        let (cell, _) = kmeans::nearest_centroid(vector, &state.coarse_centroids);
        let codes = state.quantizer.encode(vector)?;
        state.cells[cell].push(Posting { id, codes });
        Ok(())
    }

    /// Return up to `k` (id, squared distance) pairs, nearest first.
    ///
    /// Probes the `nprobe` cells whose coarse centroids are closest to the
    /// query. Ordering is by distance, then by id for equal distances.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<(NumericId, f32)>, VectorIndexError> {
        self.dimension.validate(query)?;
        let state = self.trained.as_ref().ok_or(VectorIndexError::NotTrained)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut cell_order: Vec<(usize, f32)> = state
            .coarse_centroids
            .iter()
            .enumerate()
            .map(|(idx, centroid)| (idx, squared_euclidean(query, centroid)))
            .collect();
        cell_order.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let tables = state.quantizer.distance_tables(query)?;
        let probes = nprobe.max(1).min(cell_order.len());

        let mut candidates: Vec<(NumericId, f32)> = Vec::new();
        for &(cell, _) in cell_order.iter().take(probes) {
            for posting in &state.cells[cell] {
                let dist = ProductQuantizer::approx_distance(&tables, &posting.codes);
                candidates.push((posting.id, dist));
            }
        }

        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        candidates.truncate(k);
        Ok(candidates)
    }
}

fn cell_count_for(n: usize) -> usize {
    let root = (n as f64).sqrt().floor() as usize;
    root.max(1).min(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dim(d: usize) -> VectorDimension {
        VectorDimension::new(d).unwrap()
    }

    fn params() -> IndexParams {
        IndexParams {
            subvectors: 2,
            code_bits: 8,
        }
    }

    fn line_vectors(n: usize) -> Vec<Vec<f32>> {
        (0..n).map(|i| vec![i as f32, (i * 2) as f32]).collect()
    }

    fn trained_index(n: usize) -> IvfPqIndex {
        let vectors = line_vectors(n);
        let mut index = IvfPqIndex::new(dim(2), params()).unwrap();
        index.train(&vectors, false).unwrap();
        for (i, v) in vectors.iter().enumerate() {
            index.add(NumericId(i as u64), v).unwrap();
        }
        index
    }

    #[test]
    fn cell_count_follows_sqrt_rule() {
        assert_eq!(cell_count_for(1), 1);
        assert_eq!(cell_count_for(2), 1);
        assert_eq!(cell_count_for(3), 1);
        assert_eq!(cell_count_for(4), 2);
        assert_eq!(cell_count_for(100), 10);
        assert_eq!(cell_count_for(150), 12);
    }

    #[test]
    fn untrained_operations_fail() {
        let mut index = IvfPqIndex::new(dim(2), params()).unwrap();
        assert!(!index.is_trained());
        assert!(matches!(
            index.add(NumericId(0), &[1.0, 2.0]),
            Err(VectorIndexError::NotTrained)
        ));
        assert!(matches!(
            index.search(&[1.0, 2.0], 3, 1),
            Err(VectorIndexError::NotTrained)
        ));
    }

    #[test]
    fn train_is_idempotent_unless_forced() {
        let vectors = line_vectors(9);
        let mut index = IvfPqIndex::new(dim(2), params()).unwrap();
        index.train(&vectors, false).unwrap();
        index.add(NumericId(0), &vectors[0]).unwrap();
        assert_eq!(index.len(), 1);

        // Second train without force keeps postings.
        index.train(&vectors, false).unwrap();
        assert_eq!(index.len(), 1);

        // Forced retrain discards them.
        index.train(&vectors, true).unwrap();
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn empty_training_set_is_rejected() {
        let mut index = IvfPqIndex::new(dim(2), params()).unwrap();
        assert!(matches!(
            index.train(&[], false),
            Err(VectorIndexError::EmptyTraining)
        ));
    }

    #[test]
    fn finds_nearest_neighbors() {
        let index = trained_index(30);
        let hits = index.search(&[10.0, 20.0], 3, index.cell_count()).unwrap();
        assert_eq!(hits.len(), 3);
        // Probing all cells, the closest stored vector is the query itself.
        assert_eq!(hits[0].0, NumericId(10));
        assert!(hits[0].1 <= hits[1].1);
        assert!(hits[1].1 <= hits[2].1);
    }

    #[test]
    fn ties_break_on_numeric_id() {
        let mut index = IvfPqIndex::new(dim(2), params()).unwrap();
        let vectors = vec![vec![1.0, 1.0], vec![1.0, 1.0], vec![4.0, 4.0]];
        index.train(&vectors, false).unwrap();
        index.add(NumericId(9), &vectors[0]).unwrap();
        index.add(NumericId(2), &vectors[1]).unwrap();
        index.add(NumericId(5), &vectors[2]).unwrap();

        let hits = index.search(&[1.0, 1.0], 2, 1).unwrap();
        assert_eq!(hits[0].0, NumericId(2));
        assert_eq!(hits[1].0, NumericId(9));
    }

    #[test]
    fn truncates_to_k() {
        let index = trained_index(20);
        let hits = index.search(&[0.0, 0.0], 5, index.cell_count()).unwrap();
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn search_with_zero_k_is_empty() {
        let index = trained_index(10);
        assert!(index.search(&[0.0, 0.0], 0, 1).unwrap().is_empty());
    }

    #[test]
    fn bincode_round_trip_preserves_results() {
        let index = trained_index(20);
        let bytes = bincode::encode_to_vec(&index, bincode::config::standard()).unwrap();
        let (restored, _): (IvfPqIndex, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).unwrap();

        let query = [7.0, 14.0];
        let before = index.search(&query, 4, index.cell_count()).unwrap();
        let after = restored.search(&query, 4, restored.cell_count()).unwrap();
        assert_eq!(before, after);
    }
}
