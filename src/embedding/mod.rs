//! Image embedding extraction.
//!
//! Turns image bytes (or an image URL) into a fixed-dimension vector.
//!
//! # Architecture
//!
//! - `decode`: decoding and canonicalization to 224x224 RGB
//! - `model`: the `FeatureModel` trait and the fastembed implementation
//! - `features`: deterministic statistical fallback features
//! - `fetch`: HTTP(S) fetching with timeout and size cap

pub mod decode;
pub mod features;
pub mod fetch;
pub mod model;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;
use url::Url;

use crate::config::EmbeddingConfig;

pub use features::STATISTICAL_DIMENSIONS;
pub use fetch::{FetchFailure, ImageFetcher};
pub use model::{FastembedImageModel, FeatureModel, ModelError};

/// Fixed-length image feature vector.
pub type Embedding = Vec<f32>;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("failed to decode image: {0}")]
    DecodeFailed(String),

    #[error("failed to fetch image from {url}: {reason}")]
    FetchFailed { url: String, reason: FetchFailure },

    #[error("feature model unavailable: {0}")]
    ModelUnavailable(String),
}

impl ExtractionError {
    /// Whether repeating the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExtractionError::FetchFailed { reason, .. } => reason.is_retryable(),
            _ => false,
        }
    }
}

/// Where the primary feature model comes from.
enum ModelSource {
    None,
    Fastembed { name: String, cache_dir: PathBuf },
}

/// Lazily resolved model handle.
enum ModelSlot {
    Unloaded,
    Ready(Arc<dyn FeatureModel>),
    Unavailable,
}

/// Converts images into embeddings of a fixed dimension.
///
/// The primary model is loaded on first use and reused afterwards; a failed
/// load is remembered. When the model cannot serve a request the extractor
/// falls back to `features::statistical_features`, which is only possible when
/// the configured dimension is `STATISTICAL_DIMENSIONS`.
pub struct EmbeddingExtractor {
    dimensions: usize,
    source: ModelSource,
    slot: Mutex<ModelSlot>,
    fetcher: ImageFetcher,
}

impl EmbeddingExtractor {
    /// Create an extractor from configuration.
    ///
    /// No model is loaded here; see `EmbeddingConfig::model`.
    pub fn new(config: &EmbeddingConfig, base_path: PathBuf) -> reqwest::Result<Self> {
        let source = match &config.model {
            Some(name) => ModelSource::Fastembed {
                name: name.clone(),
                cache_dir: base_path,
            },
            None => ModelSource::None,
        };

        Ok(Self {
            dimensions: config.dimensions,
            source,
            slot: Mutex::new(ModelSlot::Unloaded),
            fetcher: Self::fetcher(config)?,
        })
    }

    /// Create an extractor around an already loaded model.
    pub fn with_model(
        config: &EmbeddingConfig,
        model: Arc<dyn FeatureModel>,
    ) -> reqwest::Result<Self> {
        Ok(Self {
            dimensions: config.dimensions,
            source: ModelSource::None,
            slot: Mutex::new(ModelSlot::Ready(model)),
            fetcher: Self::fetcher(config)?,
        })
    }

    fn fetcher(config: &EmbeddingConfig) -> reqwest::Result<ImageFetcher> {
        ImageFetcher::new(
            Duration::from_secs(config.fetch_timeout_secs),
            config.max_image_bytes,
        )
    }

    /// Dimension of every embedding this extractor returns.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Decode `data`, canonicalize it and compute its embedding.
    pub fn extract_from_bytes(&self, data: &[u8]) -> Result<Embedding, ExtractionError> {
        let image = decode::decode_canonical(data)?;

        if let Some(model) = self.model()? {
            match model.embed(&image) {
                Ok(embedding) if embedding.len() == self.dimensions => return Ok(embedding),
                Ok(embedding) => log::warn!(
                    "model '{}' returned {} dimensions, expected {}",
                    model.name(),
                    embedding.len(),
                    self.dimensions
                ),
                Err(e) => log::warn!("model '{}' failed: {}", model.name(), e),
            }
        }

        self.fallback(&image)
    }

    /// Fetch an image over HTTP(S) and compute its embedding.
    pub fn extract_from_url(&self, url: &str) -> Result<Embedding, ExtractionError> {
        let parsed = Url::parse(url).map_err(|e| ExtractionError::FetchFailed {
            url: url.to_string(),
            reason: FetchFailure::Request(e.to_string()),
        })?;

        let data = self
            .fetcher
            .fetch(&parsed)
            .map_err(|reason| ExtractionError::FetchFailed {
                url: url.to_string(),
                reason,
            })?;

        self.extract_from_bytes(&data)
    }

    fn fallback(&self, image: &RgbImage) -> Result<Embedding, ExtractionError> {
        if self.dimensions != STATISTICAL_DIMENSIONS {
            return Err(ExtractionError::ModelUnavailable(format!(
                "no model can produce {}-dimensional embeddings",
                self.dimensions
            )));
        }
        Ok(features::statistical_features(image))
    }

    /// Resolve the model handle, loading it on first call.
    fn model(&self) -> Result<Option<Arc<dyn FeatureModel>>, ExtractionError> {
        let mut slot = self.slot.lock().map_err(|e| {
            ExtractionError::ModelUnavailable(format!("Lock poisoned: {}", e))
        })?;

        if let ModelSlot::Unloaded = *slot {
            *slot = self.load();
        }

        Ok(match &*slot {
            ModelSlot::Ready(model) => Some(model.clone()),
            _ => None,
        })
    }

    fn load(&self) -> ModelSlot {
        let (name, cache_dir) = match &self.source {
            ModelSource::None => return ModelSlot::Unavailable,
            ModelSource::Fastembed { name, cache_dir } => (name, cache_dir),
        };

        log::info!("Initializing feature model '{}'", name);

        match FastembedImageModel::new(name, cache_dir.clone()) {
            Ok(model) if model.dimensions() == self.dimensions => {
                log::info!("Loaded model '{}' ({} dimensions)", name, model.dimensions());
                ModelSlot::Ready(Arc::new(model))
            }
            Ok(model) => {
                log::warn!(
                    "model '{}' produces {} dimensions but embedding.dimensions is {}; using statistical features",
                    name,
                    model.dimensions(),
                    self.dimensions
                );
                ModelSlot::Unavailable
            }
            Err(e) => {
                log::warn!("Failed to load model '{}': {}; using statistical features", name, e);
                ModelSlot::Unavailable
            }
        }
    }
}
