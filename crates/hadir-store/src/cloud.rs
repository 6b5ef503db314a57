//! Managed cloud backend over a document store.
//!
//! Records live as documents keyed by their `id`; the office geofence is the
//! single document `settings/officeConfig`.

use async_trait::async_trait;
use hadir_core::{record_key, Collection, GeofenceConfig, ReconcileError, ReconcilePlan};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::Backend;
use crate::error::StoreError;
use crate::mode::BackendMode;

pub const SETTINGS_COLLECTION: &str = "settings";
pub const OFFICE_CONFIG_DOC: &str = "officeConfig";

/// A stored document: its id and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

/// One write of a batched commit.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchWrite {
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Document store addressed by collection name and document id.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError>;

    /// Create or fully replace a document.
    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Apply several writes together.
    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError>;
}

pub struct CloudBackend {
    store: Arc<dyn DocumentStore>,
}

impl CloudBackend {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Backend for CloudBackend {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        let docs = self.store.get_all(collection.name()).await?;
        let mut records: Vec<Value> = docs.into_iter().map(|d| d.data).collect();
        if let Some(field) = collection.order_field() {
            let rank = |v: &Value| v.get(field).and_then(Value::as_f64).unwrap_or(f64::MIN);
            records.sort_by(|a, b| rank(b).total_cmp(&rank(a)));
        }
        Ok(records)
    }

    async fn append(&self, collection: Collection, record: Value) -> Result<(), StoreError> {
        let key = record_key(&record).ok_or(ReconcileError::MissingKey(0))?;
        self.store.set(collection.name(), &key, record).await
    }

    async fn replace_all(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError> {
        let existing = self.store.get_all(collection.name()).await?;
        let plan = ReconcilePlan::build(existing.iter().map(|d| d.id.as_str()), records)?;
        tracing::info!(
            collection = %collection,
            deletes = plan.deletes.len(),
            upserts = plan.upserts.len(),
            "reconciling cloud collection"
        );

        let name = collection.name();
        let mut writes = Vec::with_capacity(plan.write_count());
        writes.extend(plan.deletes.into_iter().map(|id| BatchWrite::Delete {
            collection: name.to_string(),
            id,
        }));
        writes.extend(plan.upserts.into_iter().map(|(id, data)| BatchWrite::Set {
            collection: name.to_string(),
            id,
            data,
        }));
        if writes.is_empty() {
            return Ok(());
        }
        self.store.commit(writes).await
    }

    async fn load_config(&self) -> Result<GeofenceConfig, StoreError> {
        match self.store.get(SETTINGS_COLLECTION, OFFICE_CONFIG_DOC).await? {
            Some(doc) => serde_json::from_value(doc).map_err(|e| StoreError::decode("office config", e)),
            None => Ok(GeofenceConfig::default()),
        }
    }

    async fn store_config(&self, config: &GeofenceConfig) -> Result<(), StoreError> {
        let data = serde_json::to_value(config).map_err(|e| StoreError::decode("office config", e))?;
        self.store.set(SETTINGS_COLLECTION, OFFICE_CONFIG_DOC, data).await
    }

    async fn health(&self) -> Result<(), StoreError> {
        self.store.get(SETTINGS_COLLECTION, OFFICE_CONFIG_DOC).await.map(|_| ())
    }
}

/// In-process document store. Commits are atomic under one lock.
///
/// Can be switched offline to simulate an unreachable service.
#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<BTreeMap<String, BTreeMap<String, Value>>>,
    offline: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Sorted document ids of a collection.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.lock()
            .get(collection)
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, BTreeMap<String, Value>>> {
        // A panic while holding the lock cannot leave a half-applied commit.
        self.collections.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::BackendUnreachable {
                backend: BackendMode::Cloud,
                reason: "document store offline".into(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.check_online()?;
        Ok(self
            .lock()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        self.check_online()?;
        Ok(self.lock().get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        self.check_online()?;
        self.lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.check_online()?;
        if let Some(c) = self.lock().get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut guard = self.lock();
        for write in writes {
            match write {
                BatchWrite::Set {
                    collection,
                    id,
                    data,
                } => {
                    guard.entry(collection).or_default().insert(id, data);
                }
                BatchWrite::Delete { collection, id } => {
                    if let Some(c) = guard.get_mut(&collection) {
                        c.remove(&id);
                    }
                }
            }
        }
        Ok(())
    }
}
