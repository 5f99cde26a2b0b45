//! Storage abstraction for generated and library units.
//!
//! The [`UnitStore`] trait covers two areas:
//!
//! - **generated** — one flat namespace keyed by filename. Write-once; no
//!   delete path.
//! - **library** — per-category subdirectories plus one shared JSON index
//!   listing every promoted record.
//!
//! Index updates are whole-file read-modify-write with no locking; the
//! promotion logic in [`crate::library`] is written against these
//! primitives so every backend shares the same collision and deletion
//! rules.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::LibraryUnit;

/// Abstract storage backend for units.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`save`](UnitStore::save) | Persist generated source under a filename |
/// | [`exists`](UnitStore::exists) | Existence check in the generated area |
/// | [`read`](UnitStore::read) | Read generated source back, byte-for-byte |
/// | [`list_generated`](UnitStore::list_generated) | Sorted generated filenames |
/// | [`library_filenames`](UnitStore::library_filenames) | Files in one category bucket |
/// | [`write_library_file`](UnitStore::write_library_file) | Write a promoted copy |
/// | [`remove_library_file`](UnitStore::remove_library_file) | Remove a promoted copy |
/// | [`read_index`](UnitStore::read_index) | Load the shared library index |
/// | [`write_index`](UnitStore::write_index) | Replace the shared library index |
#[async_trait]
pub trait UnitStore: Send + Sync {
    /// Persist `source` under `filename`, creating the area if needed.
    async fn save(&self, filename: &str, source: &str) -> Result<(), StoreError>;

    async fn exists(&self, filename: &str) -> Result<bool, StoreError>;

    /// Fails with [`StoreError::NotFound`] when nothing is stored.
    async fn read(&self, filename: &str) -> Result<String, StoreError>;

    async fn list_generated(&self) -> Result<Vec<String>, StoreError>;

    /// Filenames present in one library category; empty if the bucket does
    /// not exist yet.
    async fn library_filenames(&self, category: &str) -> Result<Vec<String>, StoreError>;

    async fn write_library_file(
        &self,
        category: &str,
        filename: &str,
        source: &str,
    ) -> Result<(), StoreError>;

    /// Returns `false` if the file was already absent.
    async fn remove_library_file(&self, category: &str, filename: &str)
        -> Result<bool, StoreError>;

    /// `None` when the index has never been written.
    async fn read_index(&self) -> Result<Option<Vec<LibraryUnit>>, StoreError>;

    async fn write_index(&self, records: &[LibraryUnit]) -> Result<(), StoreError>;
}
