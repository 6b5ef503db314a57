use async_trait::async_trait;
use hadir_core::{Collection, GeofenceConfig};
use serde_json::Value;

use crate::error::StoreError;

/// One physical storage backend, addressed in raw JSON records.
///
/// Typed access lives in [`StorageGateway`](crate::StorageGateway); a backend
/// only moves records in and out of named collections.
#[async_trait]
pub trait Backend: Send + Sync {
    /// All records of a collection. Logs come back newest first.
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError>;

    /// Add (or overwrite by key) a single record.
    async fn append(&self, collection: Collection, record: Value) -> Result<(), StoreError>;

    /// Make the stored collection exactly equal to `records` by key-set
    /// reconciliation: keys missing from `records` are deleted, all others
    /// upserted.
    async fn replace_all(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError>;

    async fn load_config(&self) -> Result<GeofenceConfig, StoreError>;

    async fn store_config(&self, config: &GeofenceConfig) -> Result<(), StoreError>;

    /// Reachability check. `Ok` means the backend answered.
    async fn health(&self) -> Result<(), StoreError>;
}
