//! Text embedding generation.
//!
//! [`EmbeddingEncoder`] is the seam between the service and the model so
//! tests can substitute a deterministic encoder. The production
//! implementation wraps fastembed's ONNX models.

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tracing::{debug, info};

use crate::config::EmbeddingConfig;
use crate::error::{SearchError, SearchResult};
use crate::index::VectorDimension;

/// Texts per model invocation.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Generates fixed-dimension embeddings for batches of text.
///
/// Implementations must return exactly one vector per input text, each of
/// `dimension()` length, or fail the whole batch.
pub trait EmbeddingEncoder: Send + Sync {
    fn encode(&self, texts: &[&str]) -> SearchResult<Vec<Vec<f32>>>;
    fn dimension(&self) -> VectorDimension;
}

/// fastembed-backed encoder.
///
/// TextEmbedding requires &mut self for embed(), so interior mutability
/// is needed for the Send + Sync trait contract.
pub struct FastEmbedEncoder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
    batch_size: usize,
}

impl FastEmbedEncoder {
    /// Initialize the configured model, downloading it on first use.
    ///
    /// The embedding dimension is probed with a throwaway encode rather
    /// than hardcoded per model.
    pub fn new(config: &EmbeddingConfig) -> SearchResult<Self> {
        let model_kind = parse_model_name(&config.model)?;
        info!(model = %config.model, "initializing embedding model");

        let mut model = TextEmbedding::try_new(
            InitOptions::new(model_kind)
                .with_cache_dir(model_cache_dir())
                .with_show_download_progress(false),
        )
        .map_err(|e| SearchError::Encoding(format!("failed to initialize model: {e}")))?;

        let probe = model
            .embed(vec!["dimension probe".to_string()], None)
            .map_err(|e| SearchError::Encoding(format!("model probe failed: {e}")))?;
        let dim = probe.first().map_or(0, Vec::len);
        let dimension = VectorDimension::new(dim)?;
        debug!(dimension = dim, "probed embedding dimension");

        Ok(Self {
            model: Mutex::new(model),
            model_name: config.model.clone(),
            dimension,
            batch_size: config.batch_size.max(1),
        })
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl EmbeddingEncoder for FastEmbedEncoder {
    fn encode(&self, texts: &[&str]) -> SearchResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch: Vec<String> = chunk.iter().map(ToString::to_string).collect();
            let mut model = self
                .model
                .lock()
                .map_err(|_| SearchError::Encoding("model lock poisoned".to_string()))?;
            let vectors = model.embed(batch, None).map_err(|e| {
                SearchError::Encoding(format!("batch of {} texts failed: {e}", chunk.len()))
            })?;
            drop(model);

            if vectors.len() != chunk.len() {
                return Err(SearchError::Encoding(format!(
                    "model returned {} vectors for {} texts",
                    vectors.len(),
                    chunk.len()
                )));
            }
            for vector in &vectors {
                self.dimension.validate(vector)?;
            }
            out.extend(vectors);
        }
        Ok(out)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }
}

fn parse_model_name(name: &str) -> SearchResult<EmbeddingModel> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        other => Err(SearchError::Encoding(format!(
            "unknown embedding model '{other}'\nSuggestion: Use AllMiniLML6V2, AllMiniLML12V2, or BGESmallENV15"
        ))),
    }
}

fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shopfind")
        .join("models")
}
