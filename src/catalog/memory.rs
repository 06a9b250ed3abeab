use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::Utc;

use super::{CatalogStore, Item, ItemCreate, StorageError};
use crate::eid::Eid;

#[derive(Debug, Default)]
struct Inner {
    /// Insertion order.
    items: Vec<Arc<Item>>,
    /// Id -> position in `items`.
    index: HashMap<Eid, usize>,
}

/// In-memory catalog.
///
/// Readers share a `RwLock`; `create` holds the write lock while it updates
/// both the item list and the id index.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))
    }
}

impl CatalogStore for MemoryCatalog {
    fn create(&self, item: ItemCreate) -> Result<Arc<Item>, StorageError> {
        item.validate()?;

        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Backend(format!("Lock poisoned: {}", e)))?;

        if let Some(id) = &item.id {
            if inner.index.contains_key(id) {
                return Err(StorageError::DuplicateId(id.clone()));
            }
        }

        let mut item = item.into_item(Utc::now());
        // generated ids must not shadow caller-chosen ones
        while inner.index.contains_key(&item.id) {
            item.id = Eid::new();
        }

        let item = Arc::new(item);
        let position = inner.items.len();
        inner.index.insert(item.id.clone(), position);
        inner.items.push(item.clone());

        log::debug!("catalog: created item {} ({})", item.id, item.category);

        Ok(item)
    }

    fn list_all(&self) -> Result<Vec<Arc<Item>>, StorageError> {
        Ok(self.read()?.items.clone())
    }

    fn list_by_category(&self, category: &str) -> Result<Vec<Arc<Item>>, StorageError> {
        Ok(self
            .read()?
            .items
            .iter()
            .filter(|item| item.in_category(category))
            .cloned()
            .collect())
    }

    fn get(&self, id: &Eid) -> Result<Option<Arc<Item>>, StorageError> {
        let inner = self.read()?;
        Ok(inner.index.get(id).map(|&pos| inner.items[pos].clone()))
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read()?.items.len())
    }
}
