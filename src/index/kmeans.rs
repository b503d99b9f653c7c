//! K-means clustering over f32 vectors with squared Euclidean distance.
//!
//! Used twice by the index: once to place the coarse inverted-file
//! centroids and once per sub-quantizer to train product-quantization
//! codebooks. Initialization is k-means++ with a caller-supplied seed so
//! training the same data twice produces the same structure.

use rand::SeedableRng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rayon::prelude::*;
use thiserror::Error;

const MAX_ITERATIONS: usize = 100;
const CONVERGENCE_TOLERANCE: f32 = 1e-4;

/// Errors from k-means training.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("Cannot cluster an empty vector set")]
    EmptyVectorSet,

    #[error("Cluster count must be between 1 and the vector count, got {0}")]
    InvalidClusterCount(usize),

    #[error("Vectors have inconsistent dimensions")]
    InconsistentDimensions,
}

/// Output of a k-means run.
#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Final centroids, `k` vectors of the input dimension.
    pub centroids: Vec<Vec<f32>>,
    /// Index into `centroids` for each input vector.
    pub assignments: Vec<usize>,
    /// Iterations executed before convergence or the cap.
    pub iterations: usize,
}

/// Squared Euclidean distance between two equal-length vectors.
#[inline]
#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Index and distance of the centroid nearest to `vector`.
#[must_use]
pub fn nearest_centroid(vector: &[f32], centroids: &[Vec<f32>]) -> (usize, f32) {
    let mut best = 0;
    let mut best_dist = f32::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_euclidean(vector, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    (best, best_dist)
}

/// Run k-means over `vectors`, producing `k` centroids.
///
/// The assignment step runs in parallel; updates are single-threaded.
/// Empty clusters are reseeded from the vector farthest from its
/// centroid, so all `k` centroids stay live.
pub fn kmeans(vectors: &[Vec<f32>], k: usize, seed: u64) -> Result<KMeansResult, ClusteringError> {
    if vectors.is_empty() {
        return Err(ClusteringError::EmptyVectorSet);
    }
    if k == 0 || k > vectors.len() {
        return Err(ClusteringError::InvalidClusterCount(k));
    }
    let dimension = vectors[0].len();
    if vectors.iter().any(|v| v.len() != dimension) {
        return Err(ClusteringError::InconsistentDimensions);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut centroids = plus_plus_init(vectors, k, &mut rng)?;
    let mut assignments = vec![0usize; vectors.len()];
    let mut iterations = 0;

    for iter in 0..MAX_ITERATIONS {
        iterations = iter + 1;

        let new_assignments: Vec<usize> = vectors
            .par_iter()
            .map(|v| nearest_centroid(v, &centroids).0)
            .collect();

        let stable = new_assignments == assignments;
        assignments = new_assignments;

        let mut sums = vec![vec![0.0f32; dimension]; k];
        let mut counts = vec![0usize; k];
        for (vector, &cluster) in vectors.iter().zip(assignments.iter()) {
            counts[cluster] += 1;
            for (acc, value) in sums[cluster].iter_mut().zip(vector.iter()) {
                *acc += value;
            }
        }

        let mut movement = 0.0f32;
        for cluster in 0..k {
            if counts[cluster] == 0 {
                // Reseed from the point worst served by its current centroid.
                let farthest = vectors
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i, squared_euclidean(v, &centroids[assignments[i]])))
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                centroids[cluster] = vectors[farthest].clone();
                continue;
            }
            let inv = 1.0 / counts[cluster] as f32;
            let mut updated = sums[cluster].clone();
            for value in &mut updated {
                *value *= inv;
            }
            movement += squared_euclidean(&updated, &centroids[cluster]);
            centroids[cluster] = updated;
        }

        if stable && movement < CONVERGENCE_TOLERANCE {
            break;
        }
    }

    Ok(KMeansResult {
        centroids,
        assignments,
        iterations,
    })
}

/// k-means++ seeding: first centroid uniform, later centroids weighted by
/// squared distance to the nearest chosen centroid.
fn plus_plus_init(
    vectors: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    let first = vectors
        .choose(rng)
        .ok_or(ClusteringError::EmptyVectorSet)?
        .clone();
    let mut centroids = vec![first];

    while centroids.len() < k {
        let weights: Vec<f32> = vectors
            .iter()
            .map(|v| nearest_centroid(v, &centroids).1)
            .collect();
        let total: f32 = weights.iter().sum();
        if total <= f32::EPSILON {
            // All remaining points coincide with chosen centroids; any pick works.
            centroids.push(vectors[centroids.len() % vectors.len()].clone());
            continue;
        }
        let dist = WeightedIndex::new(&weights)
            .map_err(|_| ClusteringError::InvalidClusterCount(k))?;
        centroids.push(vectors[dist.sample(rng)].clone());
    }

    Ok(centroids)
}
