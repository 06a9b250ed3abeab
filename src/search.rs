//! Visual search service.
//!
//! Runs one search as a linear pipeline:
//! validate -> extract -> candidates -> rank -> audit -> respond.
//! Each call is independent; the service holds no per-search state.

use std::sync::Arc;

use serde::Serialize;
use url::Url;

use crate::audit::{QueryLog, QueryRecord};
use crate::catalog::{CatalogStore, Item, StorageError};
use crate::config::{EmbeddingConfig, SearchConfig};
use crate::eid::Eid;
use crate::embedding::{EmbeddingExtractor, ExtractionError};
use crate::ranker::{self, RankingError, SearchResult, MAX_LIMIT};

/// Category echoed when a search is not filtered.
pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid image url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("image payload is empty")]
    EmptyPayload,

    #[error("image payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Errors that can occur during a search.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("ranking error: {0}")]
    Ranking(#[from] RankingError),
}

#[derive(Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Url(String),
}

impl std::fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageSource::Bytes(data) => write!(f, "Bytes([{} bytes])", data.len()),
            ImageSource::Url(url) => write!(f, "Url({url:?})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub source: ImageSource,
    pub category: Option<String>,
    pub min_similarity: Option<f32>,
    /// Signed so out-of-range client values are clamped, not rejected.
    pub limit: Option<i64>,
}

/// The parameters a search actually ran with, defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveQuery {
    pub category: String,
    pub min_similarity: f32,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub total: usize,
    pub query: EffectiveQuery,
}

/// Validated search parameters.
struct Plan {
    category: Option<String>,
    min_similarity: f32,
    limit: usize,
}

/// Service for searching the catalog by image similarity.
///
/// Collaborators are passed in explicitly; the service is `Send + Sync` and
/// is shared across concurrent searches behind an `Arc`.
pub struct SearchService {
    extractor: Arc<EmbeddingExtractor>,
    catalog: Arc<dyn CatalogStore>,
    query_log: Arc<dyn QueryLog>,
    defaults: SearchConfig,
    max_image_bytes: usize,
}

impl SearchService {
    pub fn new(
        extractor: Arc<EmbeddingExtractor>,
        catalog: Arc<dyn CatalogStore>,
        query_log: Arc<dyn QueryLog>,
        defaults: SearchConfig,
        embedding: &EmbeddingConfig,
    ) -> Self {
        Self {
            extractor,
            catalog,
            query_log,
            defaults,
            max_image_bytes: embedding.max_image_bytes,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    /// Search the catalog for items visually similar to the request image.
    ///
    /// "No results above threshold" is an `Ok` with an empty result list;
    /// extraction failures are always errors.
    pub fn search(&self, request: SearchRequest) -> Result<SearchResponse, SearchError> {
        let plan = self.plan(&request)?;

        let (embedding, image_url) = match request.source {
            ImageSource::Bytes(data) => {
                self.validate_payload(&data)?;
                (self.extractor.extract_from_bytes(&data)?, None)
            }
            ImageSource::Url(url) => {
                let parsed = validate_url(&url)?;
                (
                    self.extractor.extract_from_url(parsed.as_str())?,
                    Some(url.trim().to_string()),
                )
            }
        };

        let candidates = match &plan.category {
            Some(category) => self.catalog.list_by_category(category)?,
            None => self.catalog.list_all()?,
        };

        let results = ranker::rank(&embedding, &candidates, plan.min_similarity, plan.limit)?;

        log::debug!(
            "search: {} candidates, {} results (min_similarity={}, limit={})",
            candidates.len(),
            results.len(),
            plan.min_similarity,
            plan.limit
        );

        if let Err(e) = self
            .query_log
            .append(QueryRecord::new(image_url.clone(), embedding))
        {
            log::error!("failed to append query record: {}", e);
        }

        Ok(SearchResponse {
            total: results.len(),
            results,
            query: EffectiveQuery {
                category: plan
                    .category
                    .unwrap_or_else(|| ALL_CATEGORIES.to_string()),
                min_similarity: plan.min_similarity,
                limit: plan.limit,
                image_url,
            },
        })
    }

    pub fn list_all(&self) -> Result<Vec<Arc<Item>>, StorageError> {
        self.catalog.list_all()
    }

    pub fn list_by_category(&self, category: &str) -> Result<Vec<Arc<Item>>, StorageError> {
        self.catalog.list_by_category(category)
    }

    pub fn get(&self, id: &Eid) -> Result<Option<Arc<Item>>, StorageError> {
        self.catalog.get(id)
    }

    /// Validate and clamp parameters before any extraction work.
    fn plan(&self, request: &SearchRequest) -> Result<Plan, ValidationError> {
        let min_similarity = request
            .min_similarity
            .unwrap_or(self.defaults.default_min_similarity);
        if min_similarity.is_nan() {
            return Err(ValidationError::InvalidParameter {
                name: "minSimilarity",
                reason: "must be a number".to_string(),
            });
        }

        let limit = request
            .limit
            .unwrap_or(self.defaults.default_limit as i64)
            .clamp(1, MAX_LIMIT as i64);

        let category = request
            .category
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && !c.eq_ignore_ascii_case(ALL_CATEGORIES))
            .map(str::to_string);

        Ok(Plan {
            category,
            min_similarity: min_similarity.clamp(0.0, 1.0),
            limit: limit as usize,
        })
    }

    fn validate_payload(&self, data: &[u8]) -> Result<(), ValidationError> {
        if data.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if data.len() > self.max_image_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: data.len(),
                limit: self.max_image_bytes,
            });
        }
        Ok(())
    }
}

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(url: &str) -> Result<Url, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidUrl {
        url: url.to_string(),
        reason,
    };

    let parsed = Url::parse(url.trim()).map_err(|e| invalid(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", parsed.scheme())));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(parsed)
}
