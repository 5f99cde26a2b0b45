//! Filesystem-backed [`UnitStore`].
//!
//! Layout:
//!
//! ```text
//! <generated_dir>/<slug>_<millis>_<suffix>.<ext>     one flat namespace
//! <library_dir>/<category>/<Name>.<ext>              promoted copies
//! <library_dir>/metadata.json                        shared index
//! ```
//!
//! Directories are created lazily on first write. Reads of a missing
//! generated file map to [`StoreError::NotFound`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use component_harness_core::error::StoreError;
use component_harness_core::models::LibraryUnit;
use component_harness_core::resolve::validate_filename;
use component_harness_core::store::UnitStore;

use crate::config::StorageConfig;

/// Name of the shared library index file.
pub const INDEX_FILE: &str = "metadata.json";

pub struct FsUnitStore {
    generated_dir: PathBuf,
    library_dir: PathBuf,
}

impl FsUnitStore {
    pub fn new(generated_dir: impl Into<PathBuf>, library_dir: impl Into<PathBuf>) -> Self {
        Self {
            generated_dir: generated_dir.into(),
            library_dir: library_dir.into(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(&config.generated_dir, &config.library_dir)
    }

    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    pub fn library_dir(&self) -> &Path {
        &self.library_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.library_dir.join(INDEX_FILE)
    }

    fn generated_path(&self, filename: &str) -> Result<PathBuf, StoreError> {
        validate_filename(filename)?;
        Ok(self.generated_dir.join(filename))
    }

    fn library_path(&self, category: &str, filename: &str) -> Result<PathBuf, StoreError> {
        validate_filename(category)?;
        validate_filename(filename)?;
        Ok(self.library_dir.join(category).join(filename))
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let write_failed = |e: std::io::Error| StoreError::WriteFailed {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_failed)?;
    }
    tokio::fs::write(path, contents).await.map_err(write_failed)
}

async fn list_files(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl UnitStore for FsUnitStore {
    async fn save(&self, filename: &str, source: &str) -> Result<(), StoreError> {
        let path = self.generated_path(filename)?;
        write_file(&path, source.as_bytes()).await?;
        debug!(path = %path.display(), bytes = source.len(), "saved unit");
        Ok(())
    }

    async fn exists(&self, filename: &str) -> Result<bool, StoreError> {
        let path = self.generated_path(filename)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, filename: &str) -> Result<String, StoreError> {
        let path = self.generated_path(filename)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(source) => Ok(source),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(filename.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_generated(&self) -> Result<Vec<String>, StoreError> {
        list_files(&self.generated_dir).await
    }

    async fn library_filenames(&self, category: &str) -> Result<Vec<String>, StoreError> {
        validate_filename(category)?;
        list_files(&self.library_dir.join(category)).await
    }

    async fn write_library_file(
        &self,
        category: &str,
        filename: &str,
        source: &str,
    ) -> Result<(), StoreError> {
        let path = self.library_path(category, filename)?;
        write_file(&path, source.as_bytes()).await
    }

    async fn remove_library_file(
        &self,
        category: &str,
        filename: &str,
    ) -> Result<bool, StoreError> {
        let path = self.library_path(category, filename)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_index(&self) -> Result<Option<Vec<LibraryUnit>>, StoreError> {
        let path = self.index_path();
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if content.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::CorruptIndex(format!("{}: {}", path.display(), e)))
    }

    async fn write_index(&self, records: &[LibraryUnit]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| StoreError::MetadataWriteFailed(e.to_string()))?;
        write_file(&self.index_path(), json.as_bytes()).await
    }
}
