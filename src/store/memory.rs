//! In-memory document store
//!
//! Backs tests and demos without touching disk. Supports per-operation
//! fault injection so the retry path and bulk partial-failure contracts
//! can be exercised deterministically.

use super::{
    is_server_timestamp, resolve_timestamps, DocId, Document, DocumentStore, Fields, Filter,
    SubscriberSet, Subscription,
};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<DocId, Fields>>,
    /// When set, timestamp sentinels resolve to null instead of the current
    /// time, modelling a server timestamp that has not settled yet.
    hold_timestamps: bool,
    /// Faults consumed by the next operations, in order, regardless of kind.
    queued_faults: VecDeque<StoreError>,
    /// Faults bound to deletes of a specific document id, with a use count.
    delete_faults: HashMap<DocId, (StoreError, usize)>,
}

/// In-memory [`DocumentStore`] with fault injection.
pub struct MemoryStore {
    state: Mutex<State>,
    subs: SubscriberSet,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            subs: SubscriberSet::new(),
        }
    }

    /// Queue a fault that the next store operation (of any kind) returns
    /// instead of executing. Queued faults are consumed in FIFO order.
    pub fn fail_next(&self, err: StoreError) {
        self.lock().queued_faults.push_back(err);
    }

    /// Make the next `times` deletes of document `id` fail with `err`.
    pub fn fail_delete(&self, id: &str, err: StoreError, times: usize) {
        self.lock()
            .delete_faults
            .insert(id.to_string(), (err, times));
    }

    /// Leave server timestamps unresolved (null) on subsequent writes.
    pub fn hold_server_timestamps(&self, hold: bool) {
        self.lock().hold_timestamps = hold;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory store lock poisoned")
    }

    fn take_queued_fault(state: &mut State) -> Result<(), StoreError> {
        match state.queued_faults.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn resolve(state: &State, fields: &mut Fields) {
        if state.hold_timestamps {
            for value in fields.values_mut() {
                if is_server_timestamp(value) {
                    *value = Value::Null;
                }
            }
        } else {
            resolve_timestamps(fields);
        }
    }

    fn collection_docs(state: &State, collection: &str) -> Vec<Document> {
        state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn notify(&self, collection: &str, docs: &[Document]) {
        self.subs.notify(collection, docs);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, collection: &str, mut fields: Fields) -> Result<DocId, StoreError> {
        let (id, docs) = {
            let mut state = self.lock();
            Self::take_queued_fault(&mut state)?;
            Self::resolve(&state, &mut fields);

            let id = Uuid::new_v4().to_string();
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields);

            (id, Self::collection_docs(&state, collection))
        };

        self.notify(collection, &docs);
        tracing::debug!(collection, id = %id, "memory store: created document");
        Ok(id)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let mut state = self.lock();
        Self::take_queued_fault(&mut state)?;

        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            }))
    }

    async fn update(&self, collection: &str, id: &str, mut partial: Fields) -> Result<(), StoreError> {
        let docs = {
            let mut state = self.lock();
            Self::take_queued_fault(&mut state)?;
            Self::resolve(&state, &mut partial);

            let fields = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::Missing(id.to_string()))?;
            fields.extend(partial);

            Self::collection_docs(&state, collection)
        };

        self.notify(collection, &docs);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let docs = {
            let mut state = self.lock();
            Self::take_queued_fault(&mut state)?;

            let fault = state.delete_faults.get_mut(id).map(|(err, remaining)| {
                *remaining -= 1;
                (err.clone(), *remaining == 0)
            });
            if let Some((err, exhausted)) = fault {
                if exhausted {
                    state.delete_faults.remove(id);
                }
                return Err(err);
            }

            if let Some(docs) = state.collections.get_mut(collection) {
                docs.remove(id);
            }
            Self::collection_docs(&state, collection)
        };

        self.notify(collection, &docs);
        tracing::debug!(collection, id, "memory store: deleted document");
        Ok(())
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> Result<Vec<Document>, StoreError> {
        let mut state = self.lock();
        Self::take_queued_fault(&mut state)?;

        Ok(Self::collection_docs(&state, collection)
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(doc)))
            .collect())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Subscription, StoreError> {
        let initial = {
            let state = self.lock();
            Self::collection_docs(&state, collection)
        };
        Ok(self.subs.register(collection, filters, &initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: serde_json::Value) -> Fields {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn create_get_update_delete_roundtrip() {
        let store = MemoryStore::new();

        let id = store
            .create("notes", fields(json!({"title": "a", "deleted": false})))
            .await
            .unwrap();

        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["title"], json!("a"));

        store
            .update("notes", &id, fields(json!({"deleted": true})))
            .await
            .unwrap();
        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["deleted"], json!(true));
        assert_eq!(doc.fields["title"], json!("a"));

        store.delete("notes", &id).await.unwrap();
        assert!(store.get("notes", &id).await.unwrap().is_none());

        // Idempotent at the store level
        store.delete("notes", &id).await.unwrap();
    }

    #[tokio::test]
    async fn update_missing_document_fails() {
        let store = MemoryStore::new();
        let err = store
            .update("notes", "nope", fields(json!({"x": 1})))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Missing("nope".to_string()));
    }

    #[tokio::test]
    async fn query_applies_all_filters() {
        let store = MemoryStore::new();
        store
            .create("notes", fields(json!({"owner": "u1", "deleted": false})))
            .await
            .unwrap();
        store
            .create("notes", fields(json!({"owner": "u1", "deleted": true})))
            .await
            .unwrap();
        store
            .create("notes", fields(json!({"owner": "u2", "deleted": false})))
            .await
            .unwrap();

        let active_u1 = store
            .query(
                "notes",
                &[Filter::eq("owner", "u1"), Filter::eq("deleted", false)],
            )
            .await
            .unwrap();
        assert_eq!(active_u1.len(), 1);
    }

    #[tokio::test]
    async fn queued_fault_fires_once() {
        let store = MemoryStore::new();
        store.fail_next(StoreError::Transient("offline".to_string()));

        let err = store.query("notes", &[]).await.unwrap_err();
        assert!(err.is_transient());

        // Next call succeeds
        assert!(store.query("notes", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_fault_is_scoped_to_one_document() {
        let store = MemoryStore::new();
        let a = store.create("notes", fields(json!({}))).await.unwrap();
        let b = store.create("notes", fields(json!({}))).await.unwrap();

        store.fail_delete(&a, StoreError::Transient("unavailable".to_string()), 1);

        assert!(store.delete("notes", &a).await.is_err());
        store.delete("notes", &b).await.unwrap();
        // Fault consumed, second attempt goes through
        store.delete("notes", &a).await.unwrap();
    }

    #[tokio::test]
    async fn held_timestamps_resolve_to_null() {
        let store = MemoryStore::new();
        store.hold_server_timestamps(true);

        let id = store
            .create(
                "notes",
                fields(json!({"created_at": super::super::server_timestamp()})),
            )
            .await
            .unwrap();

        let doc = store.get("notes", &id).await.unwrap().unwrap();
        assert_eq!(doc.fields["created_at"], Value::Null);
    }

    #[tokio::test]
    async fn subscription_sees_writes() {
        let store = MemoryStore::new();
        let mut sub = store
            .subscribe("notes", &[Filter::eq("deleted", false)])
            .await
            .unwrap();

        assert!(sub.next().await.unwrap().is_empty());

        let id = store
            .create("notes", fields(json!({"deleted": false})))
            .await
            .unwrap();
        let snapshot = sub.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id, id);

        store
            .update("notes", &id, fields(json!({"deleted": true})))
            .await
            .unwrap();
        assert!(sub.next().await.unwrap().is_empty());
    }
}
