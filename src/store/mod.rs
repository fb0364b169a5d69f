//! Document store collaborator contract
//!
//! This module defines the abstract document store the lifecycle core is
//! written against, plus the concrete adapters:
//! - In-memory store with fault injection (testing, demos)
//! - SQLite-backed store (durable local persistence)
//!
//! Stores assign document timestamps themselves: writers place a
//! [`server_timestamp`] sentinel in a field and the store resolves it at
//! commit time, so client clock skew never reaches persisted data.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::watch;

/// Store-assigned document identifier.
pub type DocId = String;

/// Field map of a document.
pub type Fields = serde_json::Map<String, Value>;

/// A document as read back from a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub fields: Fields,
}

/// Equality filter on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.fields.get(&self.field) == Some(&self.value)
    }
}

fn matches_all(filters: &[Filter], doc: &Document) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

const SERVER_TIMESTAMP_KEY: &str = "__server_timestamp__";

/// Timestamp sentinel resolved by the store at write time.
///
/// A tagged single-key object: document field text is plain JSON strings,
/// so user content can never collide with the sentinel.
pub fn server_timestamp() -> Value {
    let mut tag = Fields::new();
    tag.insert(SERVER_TIMESTAMP_KEY.to_string(), Value::Bool(true));
    Value::Object(tag)
}

pub(crate) fn is_server_timestamp(value: &Value) -> bool {
    value.as_object().map_or(false, |obj| {
        obj.len() == 1 && obj.get(SERVER_TIMESTAMP_KEY) == Some(&Value::Bool(true))
    })
}

/// Replace every timestamp sentinel in `fields` with the current time.
/// Called by store adapters at commit time.
pub(crate) fn resolve_timestamps(fields: &mut Fields) {
    let now =
        serde_json::to_value(Utc::now()).expect("chrono DateTime serializes to a JSON string");
    for value in fields.values_mut() {
        if is_server_timestamp(value) {
            *value = now.clone();
        }
    }
}

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Abstract document store consumed by the lifecycle core.
///
/// Implementations must be safe to call concurrently; the core issues
/// bulk operations without serializing them.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document and return its store-assigned id.
    async fn create(&self, collection: &str, fields: Fields) -> StoreResult<DocId>;

    /// Fetch a single document, `None` if it does not exist.
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Merge `partial` into an existing document.
    /// Fails with [`StoreError::Missing`] if the document does not exist.
    async fn update(&self, collection: &str, id: &str, partial: Fields) -> StoreResult<()>;

    /// Permanently remove a document. Deleting an absent document is a no-op.
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// All documents in `collection` matching every filter.
    async fn query(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Document>>;

    /// Register for change notification on a filtered view of `collection`.
    ///
    /// The subscription delivers whole-result-set snapshots: one immediately,
    /// then one after every write that touches the collection. Dropping the
    /// subscription unsubscribes.
    async fn subscribe(&self, collection: &str, filters: &[Filter])
        -> StoreResult<Subscription>;
}

/// Live snapshot feed returned by [`DocumentStore::subscribe`].
///
/// Latest-value semantics: a consumer that falls behind skips intermediate
/// snapshots, but the next one it reads always reflects the store's current
/// contents. Cancelling is dropping: the store prunes the registration on
/// its next notification pass.
pub struct Subscription {
    rx: watch::Receiver<Vec<Document>>,
    first: bool,
}

impl Subscription {
    /// Next snapshot, or `None` once the store side has gone away.
    ///
    /// The first call yields the registration-time snapshot (or newer, if
    /// writes already landed); later calls wait for a change.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        if self.first {
            self.first = false;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

/// In-process subscriber registry shared by the store adapters.
///
/// Push-based stores call [`SubscriberSet::notify`] after every write with
/// the full current contents of the touched collection; each subscriber
/// receives the slice of it matching its filters.
pub(crate) struct SubscriberSet {
    entries: Mutex<Vec<SubscriberEntry>>,
}

struct SubscriberEntry {
    collection: String,
    filters: Vec<Filter>,
    tx: watch::Sender<Vec<Document>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber and deliver `initial` as its first snapshot.
    pub fn register(
        &self,
        collection: &str,
        filters: &[Filter],
        initial: &[Document],
    ) -> Subscription {
        let snapshot: Vec<Document> = initial
            .iter()
            .filter(|d| matches_all(filters, d))
            .cloned()
            .collect();
        let (tx, rx) = watch::channel(snapshot);

        self.entries
            .lock()
            .expect("subscriber set lock poisoned")
            .push(SubscriberEntry {
                collection: collection.to_string(),
                filters: filters.to_vec(),
                tx,
            });

        Subscription { rx, first: true }
    }

    /// Fan `documents` (the full contents of `collection`) out to every
    /// matching subscriber, pruning the ones whose receiver was dropped.
    /// Each watch channel keeps only the latest snapshot; a lagging
    /// consumer coalesces intermediate states instead of queueing them.
    pub fn notify(&self, collection: &str, documents: &[Document]) {
        let mut entries = self.entries.lock().expect("subscriber set lock poisoned");
        entries.retain(|entry| {
            if entry.collection != collection {
                return true;
            }
            let snapshot: Vec<Document> = documents
                .iter()
                .filter(|d| matches_all(&entry.filters, d))
                .cloned()
                .collect();
            entry.tx.send(snapshot).is_ok()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, fields: Value) -> Document {
        match fields {
            Value::Object(map) => Document {
                id: id.to_string(),
                fields: map,
            },
            _ => panic!("test document fields must be an object"),
        }
    }

    #[test]
    fn filter_matches_on_equality() {
        let d = doc("1", json!({"owner": "u1", "deleted": false}));

        assert!(Filter::eq("owner", "u1").matches(&d));
        assert!(Filter::eq("deleted", false).matches(&d));
        assert!(!Filter::eq("owner", "u2").matches(&d));
        assert!(!Filter::eq("missing", "x").matches(&d));
    }

    #[test]
    fn sentinel_resolves_to_current_time() {
        let mut fields = match json!({
            "created_at": server_timestamp(),
            "title": "untouched",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        resolve_timestamps(&mut fields);

        let resolved = fields["created_at"].as_str().unwrap();
        assert!(resolved.parse::<chrono::DateTime<Utc>>().is_ok());
        assert_eq!(fields["title"], json!("untouched"));
    }

    #[test]
    fn sentinel_lookalike_text_is_left_alone() {
        // Free text a user typed, including the sentinel key itself, is
        // never rewritten; only the tagged object form is.
        let mut fields = match json!({
            "title": SERVER_TIMESTAMP_KEY,
            "body": {"__server_timestamp__": false},
            "created_at": server_timestamp(),
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        resolve_timestamps(&mut fields);

        assert_eq!(fields["title"], json!(SERVER_TIMESTAMP_KEY));
        assert_eq!(fields["body"], json!({"__server_timestamp__": false}));
        assert!(fields["created_at"].is_string());
    }

    #[tokio::test]
    async fn subscriber_receives_initial_and_update_snapshots() {
        let subs = SubscriberSet::new();
        let d1 = doc("1", json!({"owner": "u1"}));
        let d2 = doc("2", json!({"owner": "u2"}));

        let mut sub = subs.register("notes", &[Filter::eq("owner", "u1")], &[d1.clone()]);

        let initial = sub.next().await.unwrap();
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].id, "1");

        subs.notify("notes", &[d1, d2]);
        let update = sub.next().await.unwrap();
        assert_eq!(update.len(), 1);

        subs.notify("other", &[]);
        // Notification for a different collection produces nothing; the
        // channel holds no pending snapshot.
        assert!(!sub.rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn lagging_subscriber_reads_the_current_state() {
        let subs = SubscriberSet::new();
        let mut sub = subs.register("notes", &[], &[]);

        // Many writes land before the consumer drains anything.
        let mut docs = Vec::new();
        for i in 0..17 {
            docs.push(doc(&i.to_string(), json!({"n": i})));
            subs.notify("notes", &docs);
        }

        // Intermediate snapshots coalesce; the one that arrives is current.
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 17);
        assert!(!sub.rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn dropped_subscription_is_pruned() {
        let subs = SubscriberSet::new();
        let sub = subs.register("notes", &[], &[]);
        drop(sub);

        subs.notify("notes", &[]);
        assert!(subs.entries.lock().unwrap().is_empty());
    }
}
