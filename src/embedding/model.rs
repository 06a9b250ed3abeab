//! Feature model abstraction and the fastembed-backed implementation.
//!
//! - `FeatureModel`: any model turning a canonical image into a vector
//! - `FastembedImageModel`: fastembed `ImageEmbedding` wrapper, downloaded on
//!   first use into the configured cache directory

use std::path::PathBuf;
use std::sync::Mutex;

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions};
use image::RgbImage;

use super::decode::{encode_png, CANONICAL_SIZE};

/// Error type for feature model operations
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// A model that maps a canonical 224x224 RGB image to a feature vector.
pub trait FeatureModel: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ModelError>;
}

/// Wrapper around fastembed's ImageEmbedding model.
/// Uses a Mutex because fastembed's embed calls require &mut self.
pub struct FastembedImageModel {
    model: Mutex<ImageEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastembedImageModel {
    /// Load the named model, downloading it into `cache_dir/models` if needed.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, ModelError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            ModelError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = ImageInitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = ImageEmbedding::try_new(options)
            .map_err(|e| ModelError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<ImageEmbeddingModel, ModelError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok(ImageEmbeddingModel::ClipVitB32),
            "resnet50" | "resnet-50" => Ok(ImageEmbeddingModel::Resnet50),
            "unicom-vit-b-16" | "unicomvitb16" => Ok(ImageEmbeddingModel::UnicomVitB16),
            "unicom-vit-b-32" | "unicomvitb32" => Ok(ImageEmbeddingModel::UnicomVitB32),
            "nomic-embed-vision-v1.5" | "nomicembedvisionv15" => {
                Ok(ImageEmbeddingModel::NomicEmbedVisionV15)
            }
            _ => Err(ModelError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, resnet50, unicom-vit-b-16, unicom-vit-b-32, nomic-embed-vision-v1.5",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut ImageEmbedding) -> Result<usize, ModelError> {
        let probe = RgbImage::from_pixel(CANONICAL_SIZE, CANONICAL_SIZE, image::Rgb([127, 127, 127]));
        let bytes = encode_png(&probe)
            .map_err(|e| ModelError::InitFailed(format!("Failed to encode probe image: {}", e)))?;

        let embeddings = model
            .embed_bytes(&[bytes.as_slice()], None)
            .map_err(|e| ModelError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| ModelError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl FeatureModel for FastembedImageModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, image: &RgbImage) -> Result<Vec<f32>, ModelError> {
        let bytes = encode_png(image).map_err(|e| ModelError::EmbeddingFailed(e.to_string()))?;

        let mut model = self.model.lock().map_err(|e| {
            ModelError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed_bytes(&[bytes.as_slice()], None)
            .map_err(|e| ModelError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_model_name() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = FastembedImageModel::new("nonexistent-model", temp_dir.path().to_path_buf());
        assert!(matches!(result, Err(ModelError::InvalidModel(_))));
    }

    #[test]
    fn test_model_name_aliases() {
        assert!(matches!(
            FastembedImageModel::parse_model_name("CLIP-ViT-B-32"),
            Ok(ImageEmbeddingModel::ClipVitB32)
        ));
        assert!(matches!(
            FastembedImageModel::parse_model_name("resnet-50"),
            Ok(ImageEmbeddingModel::Resnet50)
        ));
    }

    // Requires model download - run with --ignored
    #[test]
    #[ignore = "requires model download"]
    fn test_clip_embedding_generation() {
        let temp_dir = tempfile::tempdir().unwrap();
        let model = FastembedImageModel::new("clip-vit-b-32", temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(model.dimensions(), 512);

        let image = RgbImage::from_pixel(CANONICAL_SIZE, CANONICAL_SIZE, image::Rgb([200, 10, 10]));
        let embedding = model.embed(&image).unwrap();
        assert_eq!(embedding.len(), 512);
        assert_eq!(model.embed(&image).unwrap(), embedding);
    }
}
