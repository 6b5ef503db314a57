//! Collections as JSON files in one directory.
//!
//! One file per collection plus `config.json` (office geofence) and
//! `koneksi.json` (advertised API endpoint). Every mutation is a
//! read-modify-write under a single lock; files are replaced by rename.

use hadir_core::{record_key, Collection, GeofenceConfig, ReconcileError, ReconcilePlan};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;

pub const CONFIG_FILE: &str = "config.json";
pub const ENDPOINT_FILE: &str = "koneksi.json";
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api";

#[derive(Error, Debug)]
pub enum FileStoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path} does not hold a JSON array")]
    NotAList { path: PathBuf },
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Result of a replace-all: how many stored records were removed and how many written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceSummary {
    pub deleted: usize,
    pub written: usize,
}

pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

fn file_name(collection: Collection) -> String {
    format!("{}.json", collection.name())
}

fn default_contents(file: &str) -> Value {
    match file {
        CONFIG_FILE => json!(GeofenceConfig::default()),
        ENDPOINT_FILE => json!({ "endpoint": DEFAULT_ENDPOINT }),
        _ => json!([]),
    }
}

impl FileStore {
    /// Open `dir`, creating it and any missing collection files.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FileStoreError::Io {
                path: dir.clone(),
                source,
            })?;

        let store = Self {
            dir,
            lock: Mutex::new(()),
        };

        let files = Collection::ALL
            .into_iter()
            .map(file_name)
            .chain([CONFIG_FILE.to_string(), ENDPOINT_FILE.to_string()]);
        for file in files {
            let path = store.dir.join(&file);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                continue;
            }
            store.write(&file, &default_contents(&file)).await?;
            tracing::info!(file = %file, "created collection file");
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read(&self, file: &str) -> Result<Value, FileStoreError> {
        let path = self.dir.join(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default_contents(file)),
            Err(source) => return Err(FileStoreError::Io { path, source }),
        };
        serde_json::from_slice(&bytes).map_err(|source| FileStoreError::Json { path, source })
    }

    async fn write(&self, file: &str, value: &Value) -> Result<(), FileStoreError> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!(".{file}.tmp"));
        let body = serde_json::to_vec_pretty(value).map_err(|source| FileStoreError::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|source| FileStoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|source| FileStoreError::Io { path, source })
    }

    async fn read_list(&self, collection: Collection) -> Result<Vec<Value>, FileStoreError> {
        let file = file_name(collection);
        match self.read(&file).await? {
            Value::Array(items) => Ok(items),
            _ => Err(FileStoreError::NotAList {
                path: self.dir.join(file),
            }),
        }
    }

    pub async fn list(&self, collection: Collection) -> Result<Vec<Value>, FileStoreError> {
        let _guard = self.lock.lock().await;
        self.read_list(collection).await
    }

    /// Insert at the front. A stored record with the same key is replaced.
    pub async fn prepend(&self, collection: Collection, record: Value) -> Result<(), FileStoreError> {
        let _guard = self.lock.lock().await;
        let mut items = self.read_list(collection).await?;
        if let Some(key) = record_key(&record) {
            items.retain(|r| record_key(r).as_deref() != Some(key.as_str()));
        }
        items.insert(0, record);
        self.write(&file_name(collection), &Value::Array(items)).await
    }

    /// Make the collection equal to `records`, reconciling by key.
    pub async fn replace(
        &self,
        collection: Collection,
        records: Vec<Value>,
    ) -> Result<ReplaceSummary, FileStoreError> {
        let _guard = self.lock.lock().await;
        let stored = self.read_list(collection).await?;
        let stored_keys: Vec<String> = stored.iter().filter_map(record_key).collect();
        let plan = ReconcilePlan::build(stored_keys.iter().map(String::as_str), records)?;
        let summary = ReplaceSummary {
            deleted: plan.deletes.len(),
            written: plan.upserts.len(),
        };
        self.write(&file_name(collection), &Value::Array(plan.apply_to_list()))
            .await?;
        Ok(summary)
    }

    pub async fn config(&self) -> Result<Value, FileStoreError> {
        let _guard = self.lock.lock().await;
        self.read(CONFIG_FILE).await
    }

    pub async fn set_config(&self, config: &GeofenceConfig) -> Result<(), FileStoreError> {
        let _guard = self.lock.lock().await;
        self.write(CONFIG_FILE, &json!(config)).await
    }

    pub async fn endpoint(&self) -> Result<Value, FileStoreError> {
        let _guard = self.lock.lock().await;
        self.read(ENDPOINT_FILE).await
    }

    pub async fn set_endpoint(&self, value: &Value) -> Result<(), FileStoreError> {
        let _guard = self.lock.lock().await;
        self.write(ENDPOINT_FILE, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("db")).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_open_seeds_defaults() {
        let (_dir, store) = store().await;
        assert!(store.list(Collection::Logs).await.unwrap().is_empty());
        let cfg: GeofenceConfig = serde_json::from_value(store.config().await.unwrap()).unwrap();
        assert_eq!(cfg, GeofenceConfig::default());
        assert_eq!(store.endpoint().await.unwrap()["endpoint"], DEFAULT_ENDPOINT);
        assert!(store.dir().join("activities.json").exists());
    }

    #[tokio::test]
    async fn test_prepend_newest_first_and_dedupes() {
        let (_dir, store) = store().await;
        store.prepend(Collection::Logs, json!({"id": "a", "n": 1})).await.unwrap();
        store.prepend(Collection::Logs, json!({"id": "b"})).await.unwrap();
        store.prepend(Collection::Logs, json!({"id": "a", "n": 2})).await.unwrap();
        let logs = store.list(Collection::Logs).await.unwrap();
        assert_eq!(logs, vec![json!({"id": "a", "n": 2}), json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn test_replace_deletes_absent_keys() {
        let (_dir, store) = store().await;
        store
            .replace(Collection::Logs, vec![json!({"id": "a"}), json!({"id": "b"})])
            .await
            .unwrap();
        let summary = store
            .replace(Collection::Logs, vec![json!({"id": "b"})])
            .await
            .unwrap();
        assert_eq!(summary, ReplaceSummary { deleted: 1, written: 1 });
        assert_eq!(store.list(Collection::Logs).await.unwrap(), vec![json!({"id": "b"})]);
    }

    #[tokio::test]
    async fn test_replace_rejects_keyless_records() {
        let (_dir, store) = store().await;
        store.replace(Collection::Users, vec![json!({"id": "u1"})]).await.unwrap();
        let err = store
            .replace(Collection::Users, vec![json!({"name": "no id"})])
            .await
            .unwrap_err();
        assert!(matches!(err, FileStoreError::Reconcile(ReconcileError::MissingKey(0))));
        // A rejected replace leaves the file untouched.
        assert_eq!(store.list(Collection::Users).await.unwrap(), vec![json!({"id": "u1"})]);
    }

    #[tokio::test]
    async fn test_existing_files_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.prepend(Collection::Feeds, json!({"id": "f"})).await.unwrap();
        drop(store);
        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.list(Collection::Feeds).await.unwrap().len(), 1);
    }
}
