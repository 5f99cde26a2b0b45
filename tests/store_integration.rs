//! Integration tests for the filesystem store and library promotion.

use tempfile::TempDir;

use component_harness::fs_store::FsUnitStore;
use component_harness_core::error::StoreError;
use component_harness_core::library::{self, PromoteRequest};
use component_harness_core::resolve::resolve_filename;
use component_harness_core::store::UnitStore;

fn store(tmp: &TempDir) -> FsUnitStore {
    FsUnitStore::new(tmp.path().join("generated"), tmp.path().join("library"))
}

fn request(filename: &str, name: &str, category: &str) -> PromoteRequest {
    PromoteRequest {
        generated_filename: filename.to_string(),
        unit_name: name.to_string(),
        description: String::new(),
        category: category.to_string(),
        tags: vec!["Card".to_string(), "card".to_string()],
    }
}

const SOURCE: &str = "export default function Card({ data }) {\n  return <div>{data?.title}</div>\n}\n";

#[tokio::test]
async fn test_generated_round_trip() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);

    assert!(store.list_generated().await.unwrap().is_empty());

    let (_id, filename) = resolve_filename("Weather Dashboard!!", "tsx");
    assert!(filename.starts_with("weather_dashboard_"));
    store.save(&filename, SOURCE).await.unwrap();

    assert!(store.exists(&filename).await.unwrap());
    assert!(!store.exists("other.tsx").await.unwrap());
    assert_eq!(store.read(&filename).await.unwrap(), SOURCE);
    assert_eq!(store.list_generated().await.unwrap(), vec![filename.clone()]);
    assert!(tmp.path().join("generated").join(&filename).is_file());

    let err = store.read("other.tsx").await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let err = store.save("../escape.tsx", SOURCE).await.unwrap_err();
    assert!(matches!(err, StoreError::InvalidFilename(_)));
}

#[tokio::test]
async fn test_promote_suffixes_within_category() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    store.save("card_1_a.tsx", SOURCE).await.unwrap();

    let first = library::promote(&store, request("card_1_a.tsx", "Card", "ui"), "tsx")
        .await
        .unwrap();
    assert_eq!(first.record.name, "Card");
    assert!(!first.name_modified);
    assert_eq!(first.record.tags, vec!["card"]);

    let second = library::promote(&store, request("card_1_a.tsx", "Card", "ui"), "tsx")
        .await
        .unwrap();
    assert_eq!(second.record.name, "Card_1");
    assert!(second.name_modified);
    assert_eq!(second.original_name, "Card");

    // A different category is a separate namespace
    let other = library::promote(&store, request("card_1_a.tsx", "Card", "forms"), "tsx")
        .await
        .unwrap();
    assert_eq!(other.record.name, "Card");

    let lib = tmp.path().join("library");
    assert_eq!(
        std::fs::read_to_string(lib.join("ui/Card_1.tsx")).unwrap(),
        SOURCE
    );
    assert!(lib.join("forms/Card.tsx").is_file());
    assert!(lib.join("metadata.json").is_file());

    let records = library::list_library(&store).await.unwrap();
    assert_eq!(records.len(), 3);
    assert_ne!(records[0].id, records[1].id);
}

#[tokio::test]
async fn test_promote_avoids_untracked_files() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    store.save("card_1_a.tsx", SOURCE).await.unwrap();
    store
        .write_library_file("ui", "Card.tsx", "handwritten")
        .await
        .unwrap();

    let p = library::promote(&store, request("card_1_a.tsx", "Card", "ui"), "tsx")
        .await
        .unwrap();
    assert_eq!(p.record.name, "Card_1");
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("library/ui/Card.tsx")).unwrap(),
        "handwritten"
    );
}

#[tokio::test]
async fn test_promote_missing_source() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    let err = library::promote(&store, request("ghost.tsx", "Ghost", "ui"), "tsx")
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::SourceNotFound(_)));
    assert!(!tmp.path().join("library/metadata.json").exists());
}

#[tokio::test]
async fn test_delete_removes_record_and_file() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    store.save("card_1_a.tsx", SOURCE).await.unwrap();
    let p = library::promote(&store, request("card_1_a.tsx", "Card", "ui"), "tsx")
        .await
        .unwrap();

    let removed = library::delete_library(&store, &p.record.id).await.unwrap();
    assert_eq!(removed.name, "Card");
    assert!(!tmp.path().join("library/ui/Card.tsx").exists());
    assert!(library::list_library(&store).await.unwrap().is_empty());

    let err = library::delete_library(&store, &p.record.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn test_corrupt_index_is_reported() {
    let tmp = TempDir::new().unwrap();
    let store = store(&tmp);
    std::fs::create_dir_all(tmp.path().join("library")).unwrap();
    std::fs::write(tmp.path().join("library/metadata.json"), "{not json").unwrap();

    let err = store.read_index().await.unwrap_err();
    assert!(matches!(err, StoreError::CorruptIndex(_)));

    std::fs::write(tmp.path().join("library/metadata.json"), "  \n").unwrap();
    assert_eq!(store.read_index().await.unwrap(), Some(Vec::new()));
}
