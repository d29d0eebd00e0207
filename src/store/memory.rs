//! In-memory [`DocumentStore`] for tests and dry runs.
//!
//! Mirrors document-store upsert semantics: the stored document is the
//! filter merged with every `$set` payload applied to it so far.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::DocumentStore;
use crate::error::ExtractError;

/// In-memory store keyed by `(collection, canonical filter JSON)`.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<HashMap<(String, String), Map<String, Value>>>,
    upserts: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored document of `collection`, in no particular order.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.docs
            .read()
            .map(|docs| {
                docs.iter()
                    .filter(|((c, _), _)| c == collection)
                    .map(|(_, doc)| Value::Object(doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The stored document matching `filter` exactly, if any.
    pub fn find(&self, collection: &str, filter: &Map<String, Value>) -> Option<Value> {
        let key = (collection.to_string(), canonical_key(filter));
        self.docs
            .read()
            .ok()?
            .get(&key)
            .map(|doc| Value::Object(doc.clone()))
    }

    /// Total number of upsert calls received.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }
}

pub(crate) fn canonical_key(filter: &Map<String, Value>) -> String {
    // serde_json::Map is ordered by key, so this is stable.
    Value::Object(filter.clone()).to_string()
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(
        &self,
        collection: &str,
        filter: Map<String, Value>,
        values: Map<String, Value>,
    ) -> Result<(), ExtractError> {
        let key = (collection.to_string(), canonical_key(&filter));
        let mut docs = self.docs.write().map_err(|_| ExtractError::Persistence {
            collection: collection.to_string(),
            detail: "memory store lock poisoned".into(),
        })?;
        let doc = docs.entry(key).or_insert(filter);
        doc.extend(values);
        self.upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn upsert_inserts_then_replaces_fields() {
        let store = MemoryStore::new();
        let filter = obj(json!({"zipcode": "10001"}));
        store
            .upsert("zipcodes", filter.clone(), obj(json!({"market": "NYC", "state": "NY"})))
            .await
            .unwrap();
        store
            .upsert("zipcodes", filter.clone(), obj(json!({"market": "New York"})))
            .await
            .unwrap();

        assert_eq!(store.records("zipcodes").len(), 1);
        assert_eq!(
            store.find("zipcodes", &filter),
            Some(json!({"zipcode": "10001", "market": "New York", "state": "NY"}))
        );
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn collections_are_separate() {
        let store = MemoryStore::new();
        let filter = obj(json!({"zipcode": "10001"}));
        store.upsert("a", filter.clone(), Map::new()).await.unwrap();
        store.upsert("b", filter, Map::new()).await.unwrap();
        assert_eq!(store.records("a").len(), 1);
        assert_eq!(store.records("b").len(), 1);
    }
}
