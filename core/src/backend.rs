/// Backend collaborator seam
///
/// The core's only external interface: a document write/read/subscribe API
/// keyed by collection and document id, an atomic array append/remove
/// primitive, and a blob upload returning a retrievable URL. All
/// durability, ordering, and fan-out guarantees live behind this trait.
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::broadcast;

/// Collections used by the core
pub const CONVERSATIONS: &str = "conversations";
pub const MESSAGES: &str = "messages";
pub const SUMMARIES: &str = "summaries";
pub const TYPING: &str = "typing";

/// Full-state snapshot of one collection, delivered on every change.
/// Consumers treat each snapshot as a replacement, not an incremental diff.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub collection: String,
    pub documents: Vec<Value>,
}

/// Handle for a realtime subscription. Delivery stops when the handle is
/// dropped or explicitly unsubscribed.
pub struct Subscription {
    collection: String,
    rx: broadcast::Receiver<Snapshot>,
}

impl Subscription {
    pub fn new(collection: impl Into<String>, rx: broadcast::Receiver<Snapshot>) -> Self {
        Self {
            collection: collection.into(),
            rx,
        }
    }

    /// Wait for the next snapshot of the subscribed collection.
    /// Returns `None` once the backend side has gone away.
    pub async fn next(&mut self) -> Option<Snapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) if snapshot.collection == self.collection => return Some(snapshot),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    // Slow consumer; snapshots are full-state, so only the
                    // latest one matters
                    tracing::warn!("Subscription to {} lagged {} snapshots", self.collection, n);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Cancel delivery
    pub fn unsubscribe(self) {
        drop(self);
    }
}

/// Document backend with realtime subscriptions and blob storage
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a document with a server-assigned id; returns the id
    async fn create_document(&self, collection: &str, body: Value) -> Result<String>;

    /// Replace the body of an existing document
    async fn update_document(&self, collection: &str, id: &str, body: Value) -> Result<()>;

    /// Create or replace a document under a caller-chosen id
    async fn upsert_document(&self, collection: &str, id: &str, body: Value) -> Result<()>;

    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    async fn list_documents(&self, collection: &str) -> Result<Vec<Value>>;

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;

    /// Atomically append a value to an array field of a document
    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// Atomically remove all occurrences of a value from an array field
    async fn remove_from_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: &Value,
    ) -> Result<()>;

    /// Upload a blob; returns a retrievable URL
    async fn upload_blob(&self, name: &str, bytes: Bytes) -> Result<String>;

    /// Subscribe to full-collection snapshots
    fn subscribe(&self, collection: &str) -> Subscription;
}
