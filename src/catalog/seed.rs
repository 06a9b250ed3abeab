//! Startup population of the catalog from a YAML seed file.
//!
//! Seed items use the same shape as `ItemCreate`. Items without an embedding
//! get one computed from their `imageUrl`: http(s) references are fetched,
//! anything else is read as a path relative to the base directory.

use std::path::Path;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use super::{CatalogStore, ItemCreate, StorageError};
use crate::embedding::{Embedding, EmbeddingExtractor};

/// Outcome of a seeding run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    /// Items inserted into the catalog
    pub created: usize,
    /// Embeddings computed from images during seeding
    pub embedded: usize,
    /// Items inserted without an embedding because their image failed
    pub missing_embedding: usize,
    /// Items rejected by the catalog
    pub rejected: usize,
}

/// Read seed items from `path`. A missing file yields no items.
pub fn load_seed_file(path: &Path) -> anyhow::Result<Vec<ItemCreate>> {
    if !path.exists() {
        log::info!("No seed file at {}, starting with an empty catalog", path.display());
        return Ok(vec![]);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read seed file {}", path.display()))?;
    let items: Vec<ItemCreate> = serde_yml::from_str(&content)
        .with_context(|| format!("seed file {} is malformed", path.display()))?;

    Ok(items)
}

/// Insert `items` into `catalog`, computing missing embeddings in parallel.
///
/// Insertion follows the order of `items`. Failures are logged and counted,
/// never fatal.
pub fn seed_catalog(
    catalog: &dyn CatalogStore,
    extractor: &EmbeddingExtractor,
    items: Vec<ItemCreate>,
    base_path: &Path,
) -> SeedReport {
    let pending = items
        .iter()
        .filter(|item| item.embedding.is_none() && !item.image_url.is_empty())
        .count();

    let progress = ProgressBar::new(pending as u64).with_style(
        ProgressStyle::with_template("{spinner} embedding seed images {bar:30} {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let prepared: Vec<(ItemCreate, bool, bool)> = items
        .into_par_iter()
        .map(|mut item| {
            if item.embedding.is_some() || item.image_url.is_empty() {
                return (item, false, false);
            }

            let result = embed_reference(extractor, &item.image_url, base_path);
            progress.inc(1);

            match result {
                Ok(embedding) => {
                    item.embedding = Some(embedding);
                    (item, true, false)
                }
                Err(e) => {
                    log::warn!("seed item '{}': {:#}", item.name, e);
                    (item, false, true)
                }
            }
        })
        .collect();

    progress.finish_and_clear();

    let mut report = SeedReport::default();
    for (item, embedded, failed) in prepared {
        let name = item.name.clone();
        match catalog.create(item) {
            Ok(_) => {
                report.created += 1;
                report.embedded += embedded as usize;
                report.missing_embedding += failed as usize;
            }
            Err(e @ (StorageError::DuplicateId(_) | StorageError::InvalidItem(_))) => {
                log::warn!("seed item '{}' rejected: {}", name, e);
                report.rejected += 1;
            }
            Err(e) => {
                log::error!("seed item '{}' failed: {}", name, e);
                report.rejected += 1;
            }
        }
    }

    log::info!(
        "Seeded catalog: {} items ({} embedded, {} without embedding, {} rejected)",
        report.created,
        report.embedded,
        report.missing_embedding,
        report.rejected
    );

    report
}

fn embed_reference(
    extractor: &EmbeddingExtractor,
    reference: &str,
    base_path: &Path,
) -> anyhow::Result<Embedding> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return Ok(extractor.extract_from_url(reference)?);
    }

    let path = base_path.join(reference);
    let data = std::fs::read(&path)
        .with_context(|| format!("failed to read image {}", path.display()))?;
    Ok(extractor.extract_from_bytes(&data)?)
}
