//! Durable document store contract.
//!
//! The store itself is an external collaborator; the engine only requires
//! get/save/update/delete by primary key over JSON documents. This trait
//! abstracts over whatever the owning runtime provides, and [`MemoryStore`]
//! ships alongside it for tests and single-process embedding.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;

/// Trait for durable document store implementations.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a document by collection and primary key.
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Save (insert or replace) a document.
    async fn save(&self, collection: &str, key: &str, doc: Value) -> Result<()>;

    /// Merge partial fields into an existing document. Creates the
    /// document if it does not exist.
    async fn update(&self, collection: &str, key: &str, fields: Value) -> Result<()>;

    /// Delete a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;
}

/// An in-memory store backed by a concurrent map.
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn full_key(collection: &str, key: &str) -> String {
        format!("{}/{}", collection, key)
    }

    /// Number of stored documents, across all collections.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .documents
            .get(&Self::full_key(collection, key))
            .map(|doc| doc.clone()))
    }

    async fn save(&self, collection: &str, key: &str, doc: Value) -> Result<()> {
        self.documents.insert(Self::full_key(collection, key), doc);
        Ok(())
    }

    async fn update(&self, collection: &str, key: &str, fields: Value) -> Result<()> {
        let mut entry = self
            .documents
            .entry(Self::full_key(collection, key))
            .or_insert_with(|| Value::Object(Default::default()));
        if let (Value::Object(doc), Value::Object(fields)) = (entry.value_mut(), fields) {
            for (name, value) in fields {
                doc.insert(name, value);
            }
        }
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        self.documents.remove(&Self::full_key(collection, key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_save_and_get() {
        let store = MemoryStore::new();
        store
            .save("role", "admin", json!({"weight": 9}))
            .await
            .unwrap();

        let doc = store.get("role", "admin").await.unwrap().unwrap();
        assert_eq!(doc["weight"], 9);
        assert!(store.get("role", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_collections_are_disjoint() {
        let store = MemoryStore::new();
        store.save("role", "x", json!({"a": 1})).await.unwrap();
        store.save("policy", "x", json!({"a": 2})).await.unwrap();

        assert_eq!(store.get("role", "x").await.unwrap().unwrap()["a"], 1);
        assert_eq!(store.get("policy", "x").await.unwrap().unwrap()["a"], 2);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store
            .save("service", "s", json!({"enabled": true, "visible": true}))
            .await
            .unwrap();
        store
            .update("service", "s", json!({"enabled": false}))
            .await
            .unwrap();

        let doc = store.get("service", "s").await.unwrap().unwrap();
        assert_eq!(doc["enabled"], false);
        assert_eq!(doc["visible"], true);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.save("role", "x", json!({})).await.unwrap();
        store.delete("role", "x").await.unwrap();
        store.delete("role", "x").await.unwrap();
        assert!(store.get("role", "x").await.unwrap().is_none());
    }
}
