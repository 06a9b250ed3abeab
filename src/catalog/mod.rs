//! Catalog of searchable items.
//!
//! # Architecture
//!
//! - `CatalogStore`: the contract any persistence backend implements
//! - `memory`: in-memory implementor guarded by a reader/writer lock
//! - `seed`: startup population from a YAML seed file

mod memory;
pub mod seed;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eid::Eid;

pub use memory::MemoryCatalog;

/// Rating applied when an item is created without one.
pub const DEFAULT_RATING: f32 = 4.0;
/// Review count applied when an item is created without one.
pub const DEFAULT_REVIEW_COUNT: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: Eid,

    pub name: String,
    pub description: String,
    /// Free text, matched case-insensitively.
    pub category: String,
    pub price: f64,
    pub image_url: String,

    pub rating: f32,
    pub review_count: u32,

    /// Absent until computed.
    pub embedding: Option<Vec<f32>>,

    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Case-insensitive category match.
    pub fn in_category(&self, category: &str) -> bool {
        self.category.to_lowercase() == category.to_lowercase()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCreate {
    /// Assigned by the store when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Eid>,

    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub price: f64,
    #[serde(default)]
    pub image_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("item with id {0} already exists")]
    DuplicateId(Eid),

    #[error("invalid item: {0}")]
    InvalidItem(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persistence contract required by the search core.
///
/// Implementors must allow concurrent readers, serialize writers, and never
/// expose a partially applied `create` to readers.
pub trait CatalogStore: Send + Sync {
    fn create(&self, item: ItemCreate) -> Result<Arc<Item>, StorageError>;
    /// Every item, in insertion order.
    fn list_all(&self) -> Result<Vec<Arc<Item>>, StorageError>;
    /// Items whose category matches case-insensitively, in insertion order.
    fn list_by_category(&self, category: &str) -> Result<Vec<Arc<Item>>, StorageError>;
    fn get(&self, id: &Eid) -> Result<Option<Arc<Item>>, StorageError>;
    fn len(&self) -> Result<usize, StorageError>;
}

impl ItemCreate {
    /// Check the fields a stored item must satisfy.
    pub(crate) fn validate(&self) -> Result<(), StorageError> {
        if let Some(id) = &self.id {
            if id.is_blank() {
                return Err(StorageError::InvalidItem("id must not be blank".into()));
            }
        }
        if self.name.trim().is_empty() {
            return Err(StorageError::InvalidItem("name must not be empty".into()));
        }
        if self.category.trim().is_empty() {
            return Err(StorageError::InvalidItem("category must not be empty".into()));
        }
        if !self.price.is_finite() || self.price < 0.0 {
            return Err(StorageError::InvalidItem(format!(
                "price must be a non-negative number, got {}",
                self.price
            )));
        }
        Ok(())
    }

    /// Apply defaults and stamp the creation time.
    pub(crate) fn into_item(self, created_at: DateTime<Utc>) -> Item {
        Item {
            id: self.id.unwrap_or_default(),
            name: self.name,
            description: self.description,
            category: self.category,
            price: self.price,
            image_url: self.image_url,
            rating: self.rating.unwrap_or(DEFAULT_RATING),
            review_count: self.review_count.unwrap_or(DEFAULT_REVIEW_COUNT),
            embedding: self.embedding,
            created_at,
        }
    }
}
