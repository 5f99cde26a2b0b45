//! Promotion, listing and deletion of library units.
//!
//! Promotion copies a generated unit's source into a category bucket under
//! a name that is unique within that bucket, then appends a record to the
//! shared index. Names are compared against both the index records and the
//! files already present in the bucket, so a stray file is never
//! overwritten either.
//!
//! The index is rewritten whole on every change; concurrent promotions can
//! lose updates.

use std::collections::HashSet;

use tracing::debug;

use crate::classify::{describe_unit_name, normalize_tags, Classifier};
use crate::error::StoreError;
use crate::models::{category, LibraryUnit};
use crate::resolve::{file_stem, new_library_id, resolve_library_name, validate_filename};
use crate::store::UnitStore;

/// A request to copy a generated unit into the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromoteRequest {
    pub generated_filename: String,
    pub unit_name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// Outcome of a promotion.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub record: LibraryUnit,
    /// True when `record.name` differs from the requested name.
    pub name_modified: bool,
    pub original_name: String,
}

/// Inferred description, category and tags for a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMetadata {
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
}

/// Copy `req.generated_filename` into the library.
///
/// # Errors
///
/// - [`StoreError::SourceNotFound`] if the generated unit does not exist.
/// - [`StoreError::MetadataWriteFailed`] if the index cannot be rewritten.
///   The copied file is left in place.
pub async fn promote(
    store: &dyn UnitStore,
    req: PromoteRequest,
    ext: &str,
) -> Result<Promotion, StoreError> {
    validate_filename(&req.generated_filename)?;
    validate_filename(&req.unit_name)?;

    let category = if req.category.trim().is_empty() {
        category::GENERAL.to_string()
    } else {
        req.category.trim().to_string()
    };
    validate_filename(&category)?;

    let source = match store.read(&req.generated_filename).await {
        Ok(source) => source,
        Err(e) if e.is_not_found() => {
            return Err(StoreError::SourceNotFound(req.generated_filename.clone()))
        }
        Err(e) => return Err(e),
    };

    let mut index = store.read_index().await?.unwrap_or_default();

    let mut existing: HashSet<String> = index
        .iter()
        .filter(|r| r.category == category)
        .map(|r| r.name.clone())
        .collect();
    existing.extend(
        store
            .library_filenames(&category)
            .await?
            .iter()
            .map(|f| file_stem(f).to_string()),
    );

    let name = resolve_library_name(&req.unit_name, &existing);
    let filename = format!("{}.{}", name, ext);
    store
        .write_library_file(&category, &filename, &source)
        .await?;

    let record = LibraryUnit {
        id: new_library_id(),
        name: name.clone(),
        description: req.description,
        category,
        filename,
        source_text: source,
        created_at: chrono::Utc::now().to_rfc3339(),
        tags: normalize_tags(&req.tags),
    };
    index.push(record.clone());

    store
        .write_index(&index)
        .await
        .map_err(|e| StoreError::MetadataWriteFailed(e.to_string()))?;

    debug!(id = %record.id, name = %record.name, category = %record.category, "promoted unit");

    Ok(Promotion {
        name_modified: name != req.unit_name,
        original_name: req.unit_name,
        record,
    })
}

/// Every library record; empty when the index has never been written.
pub async fn list_library(store: &dyn UnitStore) -> Result<Vec<LibraryUnit>, StoreError> {
    Ok(store.read_index().await?.unwrap_or_default())
}

/// Remove the record `id` and, best-effort, its file.
///
/// A missing file is not an error. The index is rewritten after the file
/// removal attempt, so a failing rewrite leaves an orphaned file.
pub async fn delete_library(store: &dyn UnitStore, id: &str) -> Result<LibraryUnit, StoreError> {
    let mut index = store.read_index().await?.unwrap_or_default();
    let pos = index
        .iter()
        .position(|r| r.id == id)
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
    let record = index.remove(pos);

    match store
        .remove_library_file(&record.category, &record.filename)
        .await
    {
        Ok(true) => {}
        Ok(false) => debug!(id, filename = %record.filename, "library file already absent"),
        Err(e) => debug!(id, error = %e, "library file removal failed"),
    }

    store
        .write_index(&index)
        .await
        .map_err(|e| StoreError::MetadataWriteFailed(e.to_string()))?;

    Ok(record)
}

/// Derive description, category and tags for a generated unit.
///
/// Tags include the lowercased unit name.
pub async fn extract_metadata(
    store: &dyn UnitStore,
    classifier: &dyn Classifier,
    generated_filename: &str,
    unit_name: &str,
) -> anyhow::Result<UnitMetadata> {
    let source = match store.read(generated_filename).await {
        Ok(s) => s,
        Err(e) if e.is_not_found() => {
            return Err(StoreError::SourceNotFound(generated_filename.to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };

    let classification = classifier.classify(&source, unit_name).await?;
    let mut tags = classification.tags;
    tags.push(unit_name.to_lowercase());

    Ok(UnitMetadata {
        description: describe_unit_name(unit_name),
        category: if classification.category.trim().is_empty() {
            category::GENERAL.to_string()
        } else {
            classification.category
        },
        tags: normalize_tags(tags),
    })
}

/// Fill the blank description, category and tags of `req` from
/// [`extract_metadata`]. Values the caller supplied are kept.
pub async fn fill_metadata(
    store: &dyn UnitStore,
    classifier: &dyn Classifier,
    req: &mut PromoteRequest,
) -> anyhow::Result<()> {
    let meta = extract_metadata(store, classifier, &req.generated_filename, &req.unit_name).await?;
    if req.description.trim().is_empty() {
        req.description = meta.description;
    }
    if req.category.trim().is_empty() {
        req.category = meta.category;
    }
    if req.tags.is_empty() {
        req.tags = meta.tags;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::SubstringClassifier;
    use crate::store::memory::InMemoryUnitStore;

    fn request(name: &str, category: &str) -> PromoteRequest {
        PromoteRequest {
            generated_filename: "card_1_abc.tsx".to_string(),
            unit_name: name.to_string(),
            description: String::new(),
            category: category.to_string(),
            tags: vec![],
        }
    }

    async fn seeded() -> InMemoryUnitStore {
        let store = InMemoryUnitStore::new();
        store
            .save(
                "card_1_abc.tsx",
                "import { Card } from '@/components/ui/card'\nexport default function Card() {\n  return <Card/>\n}",
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_promote_twice_renames() {
        let store = seeded().await;
        let first = promote(&store, request("Card", "general"), "tsx").await.unwrap();
        assert_eq!(first.record.name, "Card");
        assert!(!first.name_modified);

        let second = promote(&store, request("Card", "general"), "tsx").await.unwrap();
        assert_eq!(second.record.name, "Card_1");
        assert!(second.name_modified);
        assert_eq!(second.original_name, "Card");
        assert_eq!(second.record.filename, "Card_1.tsx");
        assert_ne!(first.record.id, second.record.id);

        let all = list_library(&store).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_no_cross_category_collision() {
        let store = seeded().await;
        let a = promote(&store, request("Card", "ui"), "tsx").await.unwrap();
        let b = promote(&store, request("Card", "charts"), "tsx").await.unwrap();
        assert_eq!(a.record.name, "Card");
        assert_eq!(b.record.name, "Card");
    }

    #[tokio::test]
    async fn test_stray_file_counts_as_taken() {
        let store = seeded().await;
        store.write_library_file("general", "Card.tsx", "old").await.unwrap();
        let p = promote(&store, request("Card", ""), "tsx").await.unwrap();
        assert_eq!(p.record.name, "Card_1");
        assert_eq!(p.record.category, "general");
        assert_eq!(store.library_source("general", "Card.tsx").as_deref(), Some("old"));
    }

    #[tokio::test]
    async fn test_promotion_is_a_snapshot() {
        let store = seeded().await;
        let p = promote(&store, request("Card", "ui"), "tsx").await.unwrap();
        let original = store.read("card_1_abc.tsx").await.unwrap();
        assert_eq!(p.record.source_text, original);
        assert_eq!(
            store.library_source("ui", "Card.tsx").as_deref(),
            Some(original.as_str())
        );
    }

    #[tokio::test]
    async fn test_promote_missing_source() {
        let store = InMemoryUnitStore::new();
        let err = promote(&store, request("Card", "ui"), "tsx").await.unwrap_err();
        assert!(matches!(err, StoreError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_list_empty_without_index() {
        let store = InMemoryUnitStore::new();
        assert!(list_library(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_then_not_found() {
        let store = seeded().await;
        let p = promote(&store, request("Card", "ui"), "tsx").await.unwrap();
        let removed = delete_library(&store, &p.record.id).await.unwrap();
        assert_eq!(removed.id, p.record.id);
        assert!(list_library(&store)
            .await
            .unwrap()
            .iter()
            .all(|r| r.id != p.record.id));
        assert!(store.library_source("ui", "Card.tsx").is_none());

        let err = delete_library(&store, &p.record.id).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_with_missing_file_still_updates_index() {
        let store = seeded().await;
        let p = promote(&store, request("Card", "ui"), "tsx").await.unwrap();
        store.remove_library_file("ui", "Card.tsx").await.unwrap();
        delete_library(&store, &p.record.id).await.unwrap();
        assert!(list_library(&store).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_metadata() {
        let store = seeded().await;
        let meta = extract_metadata(&store, &SubstringClassifier, "card_1_abc.tsx", "TodoCard")
            .await
            .unwrap();
        assert_eq!(meta.description, "A todo card component");
        assert_eq!(meta.category, "ui");
        assert_eq!(meta.tags, vec!["card", "todocard"]);
    }

    #[tokio::test]
    async fn test_fill_metadata_keeps_supplied_values() {
        let store = seeded().await;
        let mut req = request("TodoCard", "forms");
        fill_metadata(&store, &SubstringClassifier, &mut req).await.unwrap();
        assert_eq!(req.category, "forms");
        assert_eq!(req.description, "A todo card component");
        assert_eq!(req.tags, vec!["card", "todocard"]);
    }
}
