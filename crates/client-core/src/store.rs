//! Document store boundary
//!
//! The active call token lives in a managed document database. The call
//! client only ever reads one collection, so the boundary is a single
//! listing operation returning raw JSON documents in store order.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::{CallError, CallResult};

/// Read access to a document database
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All documents of `collection`, in whatever order the store returns them
    async fn list_documents(&self, collection: &str) -> CallResult<Vec<Value>>;
}

/// Document store held in memory
///
/// Documents keep insertion order, which makes "first document" deterministic.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: DashMap<String, Vec<Value>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: impl Into<String>, document: Value) {
        self.collections.entry(collection.into()).or_default().push(document);
    }

    pub fn with_document(self, collection: impl Into<String>, document: Value) -> Self {
        self.insert(collection, document);
        self
    }

    pub fn clear(&self, collection: &str) {
        self.collections.remove(collection);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list_documents(&self, collection: &str) -> CallResult<Vec<Value>> {
        Ok(self
            .collections
            .get(collection)
            .map(|docs| docs.value().clone())
            .unwrap_or_default())
    }
}

/// Document store backed by a JSON file
///
/// The file holds an object mapping collection names to arrays of documents:
///
/// ```json
/// { "tokens": [ { "token": "006abc...", "name": "random-call" } ] }
/// ```
///
/// The file is re-read on every listing.
#[derive(Debug, Clone)]
pub struct JsonFileDocumentStore {
    path: PathBuf,
}

impl JsonFileDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn list_documents(&self, collection: &str) -> CallResult<Vec<Value>> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| CallError::store_error(format!("{}: {}", self.path.display(), e)))?;
        let root: Value = serde_json::from_str(&raw)
            .map_err(|e| CallError::store_error(format!("{}: {}", self.path.display(), e)))?;

        match root.get(collection) {
            Some(Value::Array(docs)) => {
                debug!(collection, count = docs.len(), "Listed documents");
                Ok(docs.clone())
            }
            Some(_) => Err(CallError::store_error(format!(
                "collection '{}' is not an array",
                collection
            ))),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[tokio::test]
    async fn test_in_memory_keeps_order() {
        let store = InMemoryDocumentStore::new()
            .with_document("tokens", json!({"token": "a", "name": "one"}))
            .with_document("tokens", json!({"token": "b", "name": "two"}));

        let docs = store.list_documents("tokens").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["token"], "a");

        assert!(store.list_documents("missing").await.unwrap().is_empty());

        store.clear("tokens");
        assert!(store.list_documents("tokens").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_file_store() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tokens": [{{"token": "t1", "name": "lobby"}}], "other": 5}}"#).unwrap();

        let store = JsonFileDocumentStore::new(file.path());

        let docs = store.list_documents("tokens").await.unwrap();
        assert_eq!(docs, vec![json!({"token": "t1", "name": "lobby"})]);
        assert!(store.list_documents("nothing").await.unwrap().is_empty());
        assert!(matches!(
            store.list_documents("other").await,
            Err(CallError::StoreError { .. })
        ));
    }

    #[tokio::test]
    async fn test_json_file_store_missing_file() {
        let store = JsonFileDocumentStore::new("/nonexistent/randcall/tokens.json");
        assert!(matches!(
            store.list_documents("tokens").await,
            Err(CallError::StoreError { .. })
        ));
    }
}
