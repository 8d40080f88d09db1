use linkdex_core::config::EngineConfig;
use linkdex_core::persist::{DirectoryStore, IndexStore, MemoryStore, SledStore, AUTHORITY_BLOB, META_BLOB};
use linkdex_core::{CancellationToken, EngineError, SearchEngine, SearchHit};

const QUERIES: &[&str] = &["cat", "dog", "\"dog fish\"", "cat OR fish", "dog -cat", "missing"];

fn populated() -> SearchEngine {
    let e = SearchEngine::new(EngineConfig::default()).unwrap();
    e.submit_document("https://pets.example/one", "cat dog cat", &["https://pets.example/two"]);
    e.submit_document("https://pets.example/two", "dog dog fish", &["https://pets.example/three"]);
    e.submit_document("https://pets.example/four", "a fish called dog", &["https://pets.example/one"]);
    e.recompute_authority();
    e
}

fn answers(e: &SearchEngine) -> Vec<Vec<SearchHit>> {
    QUERIES
        .iter()
        .map(|q| e.query(q, 10, &CancellationToken::new()).hits)
        .collect()
}

fn assert_round_trip(store: &dyn IndexStore) {
    let original = populated();
    let expected = answers(&original);
    let stats = original.stats();
    original.shutdown(store).unwrap();

    let reopened = SearchEngine::open(EngineConfig::default(), store).unwrap();
    assert_eq!(answers(&reopened), expected);
    let reloaded = reopened.stats();
    assert_eq!(reloaded.documents, stats.documents);
    assert_eq!(reloaded.placeholders, stats.placeholders);
    assert_eq!(reloaded.unique_terms, stats.unique_terms);
    assert_eq!(reloaded.total_postings, stats.total_postings);
    assert_eq!(reloaded.average_document_length, stats.average_document_length);
    assert_eq!(
        reopened.authority("https://pets.example/two"),
        populated().authority("https://pets.example/two")
    );
}

#[test]
fn directory_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    assert_round_trip(&DirectoryStore::new(dir.path()));
}

#[test]
fn sled_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    assert_round_trip(&SledStore::open(dir.path().join("index.sled")).unwrap());
}

#[test]
fn memory_round_trip() {
    assert_round_trip(&MemoryStore::new());
}

#[test]
fn reopened_index_keeps_growing() {
    let store = MemoryStore::new();
    populated().save(&store).unwrap();
    let e = SearchEngine::open(EngineConfig::default(), &store).unwrap();

    let three = e.submit_document("https://pets.example/three", "parrot", &["https://pets.example/one"]);
    assert!(three.outcome.is_applied());
    assert_eq!(e.stats().placeholders, 0);
    let fresh = e.submit_document("https://pets.example/five", "parrot", &[] as &[&str]);
    assert_eq!(fresh.doc_id, 4);
    assert_eq!(e.search("parrot").hits.len(), 2);
}

#[test]
fn empty_directory_is_missing_index() {
    let dir = tempfile::tempdir().unwrap();
    let result = SearchEngine::open(EngineConfig::default(), &DirectoryStore::new(dir.path()));
    assert!(matches!(result, Err(EngineError::MissingIndex(_))));
}

#[test]
fn corrupt_authority_is_rejected() {
    let store = MemoryStore::new();
    populated().save(&store).unwrap();
    store.put(AUTHORITY_BLOB, &[9, 0, 0, 0, 1, 2]).unwrap();
    let result = SearchEngine::open(EngineConfig::default(), &store);
    assert!(matches!(result, Err(EngineError::Corrupt(_))));
}

#[test]
fn meta_is_readable_json() {
    let store = MemoryStore::new();
    populated().save(&store).unwrap();
    let meta: serde_json::Value = serde_json::from_slice(&store.get(META_BLOB).unwrap().unwrap()).unwrap();
    assert_eq!(meta["version"], 1);
    assert_eq!(meta["num_docs"], 3);
    assert!(meta["created_at"].as_str().unwrap().contains('T'));
}
