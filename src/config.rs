use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;
use crate::embedding::STATISTICAL_DIMENSIONS;
use crate::ranker::MAX_LIMIT;

const CONFIG_FILE: &str = "config.yaml";

/// Largest accepted image payload, uploaded or fetched (10 MiB)
const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Default image fetch timeout in seconds
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;
/// Default similarity threshold for searches
const DEFAULT_MIN_SIMILARITY: f32 = 0.7;
/// Default result limit for searches
const DEFAULT_LIMIT: usize = 20;
const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
const DEFAULT_SEED_FILE: &str = "catalog.yaml";
const DEFAULT_AUDIT_FILE: &str = "queries.jsonl";

/// Configuration for embedding extraction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Image model name (e.g., "clip-vit-b-32"). Statistical features only when unset.
    #[serde(default)]
    pub model: Option<String>,

    /// Embedding dimension shared by the catalog and every query
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Largest accepted image in bytes
    #[serde(default = "default_max_image_bytes")]
    pub max_image_bytes: usize,

    /// Timeout for fetching an image URL in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: None,
            dimensions: STATISTICAL_DIMENSIONS,
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

fn default_dimensions() -> usize {
    STATISTICAL_DIMENSIONS
}

fn default_max_image_bytes() -> usize {
    DEFAULT_MAX_IMAGE_BYTES
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

/// Search defaults applied when a request omits them
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,

    /// Default result limit [1, 50]
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Seed file, relative to the base directory
    #[serde(default = "default_seed_file")]
    pub seed_file: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            seed_file: DEFAULT_SEED_FILE.to_string(),
        }
    }
}

fn default_seed_file() -> String {
    DEFAULT_SEED_FILE.to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Append query records to `file` instead of keeping them in memory
    #[serde(default)]
    pub persist: bool,

    #[serde(default = "default_audit_file")]
    pub file: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            persist: false,
            file: DEFAULT_AUDIT_FILE.to_string(),
        }
    }
}

fn default_audit_file() -> String {
    DEFAULT_AUDIT_FILE.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.dimensions == 0 {
            bail!("embedding.dimensions must be greater than 0");
        }
        if emb.max_image_bytes == 0 {
            bail!("embedding.max_image_bytes must be greater than 0");
        }
        if emb.fetch_timeout_secs == 0 {
            bail!("embedding.fetch_timeout_secs must be greater than 0");
        }
        if emb.model.is_none() && emb.dimensions != STATISTICAL_DIMENSIONS {
            log::warn!(
                "embedding.dimensions is {} but no model is configured; image searches will fail",
                emb.dimensions
            );
        }

        let search = &self.search;
        if !(0.0..=1.0).contains(&search.default_min_similarity) {
            bail!(
                "search.default_min_similarity must be between 0.0 and 1.0, got {}",
                search.default_min_similarity
            );
        }
        if !(1..=MAX_LIMIT).contains(&search.default_limit) {
            bail!(
                "search.default_limit must be between 1 and {MAX_LIMIT}, got {}",
                search.default_limit
            );
        }

        if self.server.listen.trim().is_empty() {
            bail!("server.listen must not be empty");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, creating it with defaults if missing.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            let config = Self {
                base_path: base_path.to_path_buf(),
                ..Default::default()
            };
            config.save()?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.base_path)?;

        let path = self.base_path.join(CONFIG_FILE);
        let temp_path = self.base_path.join(format!("{}-{CONFIG_FILE}", Eid::new()));

        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(&temp_path, config_str.as_bytes())?;
        std::fs::rename(&temp_path, &path)?;

        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute path of a file configured relative to the base directory.
    pub fn resolve(&self, file: &str) -> PathBuf {
        self.base_path.join(file)
    }
}
