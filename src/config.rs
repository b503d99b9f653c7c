//! Configuration with layered sources: defaults, then a TOML settings
//! file, then `SHOPFIND_` environment variables (nested keys separated
//! by `__`, e.g. `SHOPFIND_INDEX__NPROBE=12`).

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::embedding::DEFAULT_BATCH_SIZE;
use crate::error::{SearchError, SearchResult};
use crate::index::types::{DEFAULT_CODE_BITS, DEFAULT_NPROBE, DEFAULT_SUBVECTOR_COUNT};

pub const CONFIG_DIR: &str = ".shopfind";
pub const CONFIG_FILE: &str = "settings.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Settings schema version, for future migrations.
    pub version: u32,
    /// Directory where the index snapshot is persisted.
    pub storage_path: PathBuf,
    pub corpus: CorpusConfig,
    pub embedding: EmbeddingConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    /// Cleaned product catalog parquet file.
    pub path: PathBuf,
    /// Milliseconds between corpus existence checks during startup.
    pub wait_interval_ms: u64,
    /// Existence checks before giving up on the corpus appearing.
    pub wait_max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// fastembed model identifier.
    pub model: String,
    /// Texts per model invocation.
    pub batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Inverted-file cells probed per query.
    pub nprobe: usize,
    /// Sub-vectors per embedding; must divide the model dimension.
    pub subvectors: usize,
    /// Bits per quantization code.
    pub code_bits: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            storage_path: PathBuf::from(CONFIG_DIR).join("index"),
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/processed_products.parquet"),
            wait_interval_ms: 5000,
            wait_max_attempts: 10,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "AllMiniLML6V2".to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            nprobe: DEFAULT_NPROBE,
            subvectors: DEFAULT_SUBVECTOR_COUNT,
            code_bits: DEFAULT_CODE_BITS,
        }
    }
}

impl Settings {
    /// Load from the workspace settings file, if present, plus the
    /// environment.
    pub fn load() -> SearchResult<Self> {
        Self::load_from(&PathBuf::from(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Load with an explicit settings file path.
    pub fn load_from(path: &Path) -> SearchResult<Self> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("SHOPFIND_").split("__"))
            .extract()
            .map_err(|e| SearchError::Config(e.to_string()))
    }
}
