/// In-memory reference backend
///
/// Implements the full `ChatBackend` contract over in-process maps, with
/// snapshot fan-out on every mutation. Used by the demo binary and the
/// integration tests; failure injection and write counters exist so tests
/// can exercise the send pipeline's failure path and assert throttle and
/// fan-out properties.
use crate::backend::{ChatBackend, Snapshot, Subscription};
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex as StdMutex;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

pub struct MemoryBackend {
    /// collection -> (document id -> document body, id field included)
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    blobs: RwLock<HashMap<String, Bytes>>,
    tx: broadcast::Sender<Snapshot>,
    /// Operations marked to fail exactly once, e.g. "create:messages"
    failures: StdMutex<HashSet<String>>,
    /// Write counts per collection (creates, updates, upserts, appends)
    writes: StdMutex<HashMap<String, usize>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            collections: RwLock::new(BTreeMap::new()),
            blobs: RwLock::new(HashMap::new()),
            tx,
            failures: StdMutex::new(HashSet::new()),
            writes: StdMutex::new(HashMap::new()),
        }
    }

    /// Make the next occurrence of an operation fail.
    /// Keys: `create:<collection>`, `update:<collection>`,
    /// `upsert:<collection>`, `append:<collection>`, `upload`.
    pub fn fail_next(&self, op: &str) {
        self.failures.lock().unwrap().insert(op.to_string());
    }

    /// Number of writes observed for a collection
    pub fn writes(&self, collection: &str) -> usize {
        self.writes
            .lock()
            .unwrap()
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    fn take_failure(&self, op: &str) -> bool {
        self.failures.lock().unwrap().remove(op)
    }

    fn count_write(&self, collection: &str) {
        *self
            .writes
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_insert(0) += 1;
    }

    async fn publish(&self, collection: &str) {
        let documents = {
            let collections = self.collections.read().await;
            collections
                .get(collection)
                .map(|docs| docs.values().cloned().collect())
                .unwrap_or_default()
        };
        // No subscribers is fine
        let _ = self.tx.send(Snapshot {
            collection: collection.to_string(),
            documents,
        });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatBackend for MemoryBackend {
    async fn create_document(&self, collection: &str, body: Value) -> Result<String> {
        if self.take_failure(&format!("create:{}", collection)) {
            return Err(ChatError::Backend(format!(
                "injected failure: create {}",
                collection
            )));
        }

        let id = Uuid::new_v4().to_string();
        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.clone()));
        }

        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), body);
        }
        self.count_write(collection);
        self.publish(collection).await;
        debug!("Created document {} in {}", id, collection);
        Ok(id)
    }

    async fn update_document(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        if self.take_failure(&format!("update:{}", collection)) {
            return Err(ChatError::Backend(format!(
                "injected failure: update {}",
                collection
            )));
        }

        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }

        {
            let mut collections = self.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            match docs.get_mut(id) {
                Some(doc) => *doc = body,
                None => {
                    return Err(ChatError::Backend(format!(
                        "no such document: {}/{}",
                        collection, id
                    )))
                }
            }
        }
        self.count_write(collection);
        self.publish(collection).await;
        Ok(())
    }

    async fn upsert_document(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        if self.take_failure(&format!("upsert:{}", collection)) {
            return Err(ChatError::Backend(format!(
                "injected failure: upsert {}",
                collection
            )));
        }

        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("id".to_string(), Value::String(id.to_string()));
        }

        {
            let mut collections = self.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), body);
        }
        self.count_write(collection);
        self.publish(collection).await;
        Ok(())
    }

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        {
            let mut collections = self.collections.write().await;
            if let Some(docs) = collections.get_mut(collection) {
                docs.remove(id);
            }
        }
        self.publish(collection).await;
        Ok(())
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        if self.take_failure(&format!("append:{}", collection)) {
            return Err(ChatError::Backend(format!(
                "injected failure: append {}",
                collection
            )));
        }

        {
            let mut collections = self.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| {
                    ChatError::Backend(format!("no such document: {}/{}", collection, id))
                })?;
            let arr = doc
                .as_object_mut()
                .ok_or_else(|| ChatError::Backend("document is not an object".to_string()))?
                .entry(field)
                .or_insert_with(|| Value::Array(Vec::new()));
            match arr.as_array_mut() {
                Some(items) => items.push(value),
                None => {
                    return Err(ChatError::Backend(format!(
                        "field {} is not an array",
                        field
                    )))
                }
            }
        }
        self.count_write(collection);
        self.publish(collection).await;
        Ok(())
    }

    async fn remove_from_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &Value,
    ) -> Result<()> {
        {
            let mut collections = self.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| {
                    ChatError::Backend(format!("no such document: {}/{}", collection, id))
                })?;
            if let Some(items) = doc.get_mut(field).and_then(|v| v.as_array_mut()) {
                items.retain(|item| item != value);
            }
        }
        self.count_write(collection);
        self.publish(collection).await;
        Ok(())
    }

    async fn upload_blob(&self, name: &str, bytes: Bytes) -> Result<String> {
        if self.take_failure("upload") {
            return Err(ChatError::Upload("injected failure: upload".to_string()));
        }

        let key = format!("{}-{}", Uuid::new_v4(), name);
        let url = format!("mem://blobs/{}", key);
        self.blobs.write().await.insert(key, bytes);
        Ok(url)
    }

    fn subscribe(&self, collection: &str) -> Subscription {
        Subscription::new(collection, self.tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_list() {
        let backend = MemoryBackend::new();
        let id = backend
            .create_document("messages", serde_json::json!({ "body": "hi" }))
            .await
            .unwrap();

        let docs = backend.list_documents("messages").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["id"], Value::String(id));
        assert_eq!(backend.writes("messages"), 1);
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let backend = MemoryBackend::new();
        backend.fail_next("create:messages");

        let first = backend
            .create_document("messages", serde_json::json!({}))
            .await;
        assert!(first.is_err());

        let second = backend
            .create_document("messages", serde_json::json!({}))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_on_mutation() {
        let backend = MemoryBackend::new();
        let mut sub = backend.subscribe("messages");

        backend
            .create_document("messages", serde_json::json!({ "body": "hi" }))
            .await
            .unwrap();

        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.collection, "messages");
        assert_eq!(snapshot.documents.len(), 1);
    }

    #[tokio::test]
    async fn test_array_append_and_remove() {
        let backend = MemoryBackend::new();
        let id = backend
            .create_document("messages", serde_json::json!({ "read_by": ["alice"] }))
            .await
            .unwrap();

        backend
            .append_to_array("messages", &id, "read_by", serde_json::json!("bob"))
            .await
            .unwrap();
        let doc = backend.get_document("messages", &id).await.unwrap().unwrap();
        assert_eq!(doc["read_by"].as_array().unwrap().len(), 2);

        backend
            .remove_from_array("messages", &id, "read_by", &serde_json::json!("alice"))
            .await
            .unwrap();
        let doc = backend.get_document("messages", &id).await.unwrap().unwrap();
        assert_eq!(doc["read_by"].as_array().unwrap().len(), 1);
    }
}
