//! In-memory canonical store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use leadsync_connector::types::CollectionType;

use super::{CanonicalRecord, CanonicalStore, StoreError, StoreResult};

/// Process-local store, used by dry runs, tests and the `memory` backend.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<(CollectionType, i64), CanonicalRecord>>,
    inserts: AtomicUsize,
    updates: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows across collections.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Successful inserts since creation.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Successful updates since creation.
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CanonicalStore for InMemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn get(&self, collection: CollectionType, id: i64) -> StoreResult<Option<CanonicalRecord>> {
        Ok(self.records.read().await.get(&(collection, id)).cloned())
    }

    async fn insert(&self, record: &CanonicalRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let key = (record.collection, record.id);
        if records.contains_key(&key) {
            return Err(StoreError::Conflict {
                collection: record.collection,
                id: record.id,
            });
        }
        records.insert(key, record.clone());
        self.inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update(&self, record: &CanonicalRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&(record.collection, record.id)) {
            Some(existing) => {
                *existing = record.clone();
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                collection: record.collection,
                id: record.id,
            }),
        }
    }

    async fn list_collection(&self, collection: CollectionType) -> StoreResult<Vec<CanonicalRecord>> {
        let mut rows: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.collection == collection)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(collection: CollectionType, id: i64) -> CanonicalRecord {
        CanonicalRecord {
            id,
            collection,
            source_id: id,
            stage: None,
            fields: BTreeMap::new(),
            fingerprint: String::new(),
            resolved_from: None,
            source_created_at: None,
            source_updated_at: None,
            synced_at: None,
        }
    }

    #[tokio::test]
    async fn test_insert_conflict() {
        let store = InMemoryStore::new();
        store.insert(&row(CollectionType::Lead, 1)).await.unwrap();

        let err = store.insert(&row(CollectionType::Lead, 1)).await.unwrap_err();
        assert!(err.is_conflict());

        // Same id in another collection is a different key.
        store.insert(&row(CollectionType::Opportunity, 1)).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert_eq!(store.insert_count(), 2);
    }

    #[tokio::test]
    async fn test_update_requires_existing() {
        let store = InMemoryStore::new();
        let err = store.update(&row(CollectionType::Lead, 1)).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        store.insert(&row(CollectionType::Lead, 1)).await.unwrap();
        let mut updated = row(CollectionType::Lead, 1);
        updated.source_id = 99;
        store.update(&updated).await.unwrap();

        let stored = store.get(CollectionType::Lead, 1).await.unwrap().unwrap();
        assert_eq!(stored.source_id, 99);
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_get_many_and_list() {
        let store = InMemoryStore::new();
        for id in [3, 1, 2] {
            store.insert(&row(CollectionType::Lead, id)).await.unwrap();
        }

        let found = store
            .get_many(CollectionType::Lead, &[1, 3, 7])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key(&1));
        assert!(!found.contains_key(&7));

        let ids: Vec<_> = store
            .list_collection(CollectionType::Lead)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
