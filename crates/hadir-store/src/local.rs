//! Self-hosted backend: the HTTP JSON server on the office network.

use async_trait::async_trait;
use hadir_core::{Collection, GeofenceConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::backend::Backend;
use crate::error::StoreError;
use crate::mode::BackendMode;

/// Default endpoint of the self-hosted server.
pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000/api";

const BACKEND: BackendMode = BackendMode::Local;

pub struct LocalBackend {
    client: reqwest::Client,
    base: String,
}

impl LocalBackend {
    /// `endpoint` is the API root, e.g. `http://10.0.0.2:3000/api`.
    pub fn new(endpoint: impl Into<String>, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::BackendUnreachable {
                backend: BACKEND,
                reason: format!("HTTP client: {e}"),
            })?;
        let base = endpoint.into().trim_end_matches('/').to_string();
        Ok(Self { client, base })
    }

    pub fn endpoint(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, StoreError> {
        let resp = self
            .client
            .get(self.url(path))
            .send()
            .await
            .map_err(transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                backend: BACKEND,
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::decode(format!("GET {path} response"), e))
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        collection: &str,
        body: &T,
    ) -> Result<(), StoreError> {
        let write_failed = |reason: String| StoreError::WriteFailed {
            backend: BACKEND,
            collection: collection.to_string(),
            reason,
        };

        let resp = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    transport_error(e)
                } else {
                    write_failed(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(write_failed(format!("HTTP {}: {body}", status.as_u16())));
        }
        tracing::debug!(path, "local write accepted");
        Ok(())
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    StoreError::BackendUnreachable {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

/// Path that replaces a whole collection. The users route predates the
/// `/update` convention and replaces on plain POST.
fn replace_path(collection: Collection) -> String {
    match collection {
        Collection::Users => "users".to_string(),
        other => format!("{}/update", other.name()),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
        self.get_json(collection.name()).await
    }

    async fn append(&self, collection: Collection, record: Value) -> Result<(), StoreError> {
        if collection == Collection::Users {
            return Err(StoreError::Unsupported {
                backend: BACKEND,
                collection: collection.name().into(),
                op: "append",
            });
        }
        self.post_json(collection.name(), collection.name(), &record).await
    }

    async fn replace_all(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError> {
        // The server reconciles by key; validate keys before shipping the list.
        hadir_core::reconcile::check_keys(&records)?;
        self.post_json(&replace_path(collection), collection.name(), &records).await
    }

    async fn load_config(&self) -> Result<GeofenceConfig, StoreError> {
        self.get_json("config").await
    }

    async fn store_config(&self, config: &GeofenceConfig) -> Result<(), StoreError> {
        self.post_json("config", "config", config).await
    }

    async fn health(&self) -> Result<(), StoreError> {
        let resp = self
            .client
            .get(self.url("health"))
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::BackendUnreachable {
                backend: BACKEND,
                reason: format!("health returned HTTP {}", resp.status().as_u16()),
            })
        }
    }
}
