//! In-memory [`UnitStore`] implementation for tests and embedding.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Filenames are validated the
//! same way as the filesystem store so both reject the same inputs.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::LibraryUnit;
use crate::resolve::validate_filename;

use super::UnitStore;

/// In-memory unit store.
pub struct InMemoryUnitStore {
    generated: RwLock<BTreeMap<String, String>>,
    library: RwLock<HashMap<String, BTreeMap<String, String>>>,
    index: RwLock<Option<Vec<LibraryUnit>>>,
}

impl InMemoryUnitStore {
    pub fn new() -> Self {
        Self {
            generated: RwLock::new(BTreeMap::new()),
            library: RwLock::new(HashMap::new()),
            index: RwLock::new(None),
        }
    }

    /// Source of a promoted copy, if present.
    pub fn library_source(&self, category: &str, filename: &str) -> Option<String> {
        self.library
            .read()
            .ok()?
            .get(category)
            .and_then(|bucket| bucket.get(filename).cloned())
    }
}

impl Default for InMemoryUnitStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::other("store lock poisoned"))
}

#[async_trait]
impl UnitStore for InMemoryUnitStore {
    async fn save(&self, filename: &str, source: &str) -> Result<(), StoreError> {
        validate_filename(filename)?;
        self.generated
            .write()
            .map_err(|_| poisoned())?
            .insert(filename.to_string(), source.to_string());
        Ok(())
    }

    async fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        validate_filename(filename)?;
        Ok(self
            .generated
            .read()
            .map_err(|_| poisoned())?
            .contains_key(filename))
    }

    async fn read(&self, filename: &str) -> Result<String, StoreError> {
        validate_filename(filename)?;
        self.generated
            .read()
            .map_err(|_| poisoned())?
            .get(filename)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(filename.to_string()))
    }

    async fn list_generated(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .generated
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect())
    }

    async fn library_filenames(&self, category: &str) -> Result<Vec<String>, StoreError> {
        validate_filename(category)?;
        Ok(self
            .library
            .read()
            .map_err(|_| poisoned())?
            .get(category)
            .map(|bucket| bucket.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn write_library_file(
        &self,
        category: &str,
        filename: &str,
        source: &str,
    ) -> Result<(), StoreError> {
        validate_filename(category)?;
        validate_filename(filename)?;
        self.library
            .write()
            .map_err(|_| poisoned())?
            .entry(category.to_string())
            .or_default()
            .insert(filename.to_string(), source.to_string());
        Ok(())
    }

    async fn remove_library_file(
        &self,
        category: &str,
        filename: &str,
    ) -> Result<bool, StoreError> {
        validate_filename(category)?;
        validate_filename(filename)?;
        Ok(self
            .library
            .write()
            .map_err(|_| poisoned())?
            .get_mut(category)
            .and_then(|bucket| bucket.remove(filename))
            .is_some())
    }

    async fn read_index(&self) -> Result<Option<Vec<LibraryUnit>>, StoreError> {
        Ok(self.index.read().map_err(|_| poisoned())?.clone())
    }

    async fn write_index(&self, records: &[LibraryUnit]) -> Result<(), StoreError> {
        *self.index.write().map_err(|_| poisoned())? = Some(records.to_vec());
        Ok(())
    }
}
