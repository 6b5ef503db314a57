//! Durable client-side key/value state (SQLite).
//!
//! Holds the backend mode, the local server endpoint and the cloud project
//! configuration under fixed keys so they survive a restart.

use rusqlite::OptionalExtension;
use std::path::Path;

use crate::error::ClientStateError;
use crate::firestore::FirestoreConfig;
use crate::mode::BackendMode;

pub const KEY_STORAGE_MODE: &str = "STORAGE_MODE";
pub const KEY_SERVER_ENDPOINT: &str = "SERVER_ENDPOINT";
pub const KEY_FIREBASE_CONFIG: &str = "FIREBASE_CONFIG";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS client_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
)";

#[derive(Clone)]
pub struct ClientState {
    conn: tokio_rusqlite::Connection,
}

impl ClientState {
    /// Open (creating if needed) the state database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientStateError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, ClientStateError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self, ClientStateError> {
        conn.call(|c| {
            c.execute(SCHEMA, ())?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, ClientStateError> {
        let key = key.to_owned();
        let value = self
            .conn
            .call(move |c| {
                let value = c
                    .query_row(
                        "SELECT value FROM client_state WHERE key = ?1",
                        [&key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set(&self, key: &str, value: String) -> Result<(), ClientStateError> {
        let key = key.to_owned();
        self.conn
            .call(move |c| {
                c.execute(
                    "INSERT INTO client_state (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET
                         value = excluded.value,
                         updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
                    [&key, &value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn mode(&self) -> Result<Option<BackendMode>, ClientStateError> {
        match self.get(KEY_STORAGE_MODE).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e: crate::mode::UnknownMode| ClientStateError::Malformed {
                    key: KEY_STORAGE_MODE.into(),
                    reason: e.to_string(),
                }),
        }
    }

    pub async fn set_mode(&self, mode: BackendMode) -> Result<(), ClientStateError> {
        self.set(KEY_STORAGE_MODE, mode.as_str().to_string()).await
    }

    pub async fn endpoint(&self) -> Result<Option<String>, ClientStateError> {
        self.get(KEY_SERVER_ENDPOINT).await
    }

    pub async fn set_endpoint(&self, endpoint: &str) -> Result<(), ClientStateError> {
        self.set(KEY_SERVER_ENDPOINT, endpoint.to_string()).await
    }

    pub async fn firestore_config(&self) -> Result<Option<FirestoreConfig>, ClientStateError> {
        let Some(raw) = self.get(KEY_FIREBASE_CONFIG).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| ClientStateError::Malformed {
                key: KEY_FIREBASE_CONFIG.into(),
                reason: e.to_string(),
            })
    }

    pub async fn set_firestore_config(&self, config: &FirestoreConfig) -> Result<(), ClientStateError> {
        let raw = serde_json::to_string(config).map_err(|e| ClientStateError::Malformed {
            key: KEY_FIREBASE_CONFIG.into(),
            reason: e.to_string(),
        })?;
        self.set(KEY_FIREBASE_CONFIG, raw).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_overwrite() {
        let state = ClientState::open_in_memory().await.unwrap();
        assert_eq!(state.get("missing").await.unwrap(), None);
        state.set_endpoint("http://10.0.0.2:3000/api").await.unwrap();
        state.set_endpoint("http://10.0.0.3:3000/api").await.unwrap();
        assert_eq!(
            state.endpoint().await.unwrap().as_deref(),
            Some("http://10.0.0.3:3000/api")
        );
    }

    #[tokio::test]
    async fn test_legacy_mode_value() {
        let state = ClientState::open_in_memory().await.unwrap();
        state.set(KEY_STORAGE_MODE, "FIREBASE".into()).await.unwrap();
        assert_eq!(state.mode().await.unwrap(), Some(BackendMode::Cloud));

        state.set(KEY_STORAGE_MODE, "SOMEWHERE".into()).await.unwrap();
        assert!(matches!(
            state.mode().await,
            Err(ClientStateError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn test_firestore_config_accepts_web_sdk_shape() {
        let state = ClientState::open_in_memory().await.unwrap();
        state
            .set(
                KEY_FIREBASE_CONFIG,
                r#"{"apiKey":"k","authDomain":"x.firebaseapp.com","projectId":"wz-absence","appId":"1:2:web:3"}"#
                    .into(),
            )
            .await
            .unwrap();
        let cfg = state.firestore_config().await.unwrap().unwrap();
        assert_eq!(cfg.project_id, "wz-absence");
        assert_eq!(cfg.api_key, "k");
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/state.db");
        let state = ClientState::open(&path).await.unwrap();
        state.set_mode(BackendMode::Local).await.unwrap();
        assert!(path.exists());
    }
}
