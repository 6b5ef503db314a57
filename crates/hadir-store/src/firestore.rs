//! Firestore REST v1 document store.
//!
//! Documents are exchanged in Firestore's typed value encoding; this module
//! converts them to and from plain JSON. Authentication is by web API key,
//! matching how the project configuration is distributed to clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::cloud::{BatchWrite, Document, DocumentStore};
use crate::error::StoreError;
use crate::mode::BackendMode;

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
/// Firestore rejects commits with more writes than this.
const MAX_BATCH_WRITES: usize = 500;
const PAGE_SIZE: &str = "300";

const BACKEND: BackendMode = BackendMode::Cloud;

/// Cloud project configuration, as persisted in client state.
///
/// Accepts the full web SDK config object; only the fields used here are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirestoreConfig {
    pub project_id: String,
    pub api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

pub struct FirestoreStore {
    client: reqwest::Client,
    /// `projects/{p}/databases/(default)/documents`
    root: String,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<FsDocument>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct FsDocument {
    name: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

impl FirestoreStore {
    pub fn new(config: &FirestoreConfig, request_timeout: Duration) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::BackendUnreachable {
                backend: BACKEND,
                reason: format!("HTTP client: {e}"),
            })?;
        Ok(Self {
            client,
            root: format!("projects/{}/databases/(default)/documents", config.project_id),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn doc_name(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.root)
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/{}{suffix}", self.base_url, self.root)
    }

    async fn read_error(resp: reqwest::Response) -> StoreError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        StoreError::Status {
            backend: BACKEND,
            status,
            body,
        }
    }

    async fn write_checked(
        collection: &str,
        req: reqwest::RequestBuilder,
        tolerate_not_found: bool,
    ) -> Result<(), StoreError> {
        let write_failed = |reason: String| StoreError::WriteFailed {
            backend: BACKEND,
            collection: collection.to_string(),
            reason,
        };
        let resp = req.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                transport_error(e)
            } else {
                write_failed(e.to_string())
            }
        })?;
        let status = resp.status();
        if status.is_success() || (tolerate_not_found && status == reqwest::StatusCode::NOT_FOUND) {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(write_failed(format!("HTTP {}: {body}", status.as_u16())))
    }
}

fn transport_error(e: reqwest::Error) -> StoreError {
    StoreError::BackendUnreachable {
        backend: BACKEND,
        reason: e.to_string(),
    }
}

/// Encode plain JSON as a Firestore `Value`.
pub fn encode_value(v: &Value) -> Value {
    match v {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => json!({
            "arrayValue": { "values": items.iter().map(encode_value).collect::<Vec<_>>() }
        }),
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

fn encode_fields(map: &Map<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), encode_value(v))).collect())
}

/// Decode a Firestore `Value` into plain JSON. Unknown encodings become null.
pub fn decode_value(v: &Value) -> Value {
    let Some((kind, inner)) = v.as_object().and_then(|o| o.iter().next()) else {
        return Value::Null;
    };
    match kind.as_str() {
        "booleanValue" => inner.clone(),
        "integerValue" => match inner {
            Value::String(s) => s.parse::<i64>().map(Value::from).unwrap_or(Value::Null),
            other => other.clone(),
        },
        "doubleValue" => inner.clone(),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|vals| vals.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => decode_fields(inner.get("fields").and_then(Value::as_object)),
        "geoPointValue" => json!({
            "lat": inner.get("latitude").cloned().unwrap_or(Value::Null),
            "lng": inner.get("longitude").cloned().unwrap_or(Value::Null),
        }),
        _ => Value::Null,
    }
}

fn decode_fields(fields: Option<&Map<String, Value>>) -> Value {
    Value::Object(
        fields
            .map(|f| f.iter().map(|(k, v)| (k.clone(), decode_value(v))).collect())
            .unwrap_or_default(),
    )
}

fn object_fields(collection: &str, data: &Value) -> Result<Value, StoreError> {
    match data {
        Value::Object(map) => Ok(encode_fields(map)),
        _ => Err(StoreError::WriteFailed {
            backend: BACKEND,
            collection: collection.to_string(),
            reason: "document body must be a JSON object".into(),
        }),
    }
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        let mut docs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(self.url(&format!("/{collection}")))
                .query(&[("key", self.api_key.as_str()), ("pageSize", PAGE_SIZE)]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }
            let resp = req.send().await.map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(Self::read_error(resp).await);
            }
            let page: ListResponse = resp.json().await.map_err(transport_error)?;
            docs.extend(page.documents.into_iter().map(|d| Document {
                id: d.name.rsplit('/').next().unwrap_or_default().to_string(),
                data: decode_fields(Some(&d.fields)),
            }));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        tracing::debug!(collection, count = docs.len(), "firestore list");
        Ok(docs)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>, StoreError> {
        let resp = self
            .client
            .get(self.url(&format!("/{collection}/{id}")))
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(Self::read_error(resp).await);
        }
        let doc: FsDocument = resp.json().await.map_err(transport_error)?;
        Ok(Some(decode_fields(Some(&doc.fields))))
    }

    async fn set(&self, collection: &str, id: &str, data: Value) -> Result<(), StoreError> {
        let body = json!({ "fields": object_fields(collection, &data)? });
        // PATCH without an update mask replaces the whole document.
        let req = self
            .client
            .patch(self.url(&format!("/{collection}/{id}")))
            .query(&[("key", self.api_key.as_str())])
            .json(&body);
        Self::write_checked(collection, req, false).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let req = self
            .client
            .delete(self.url(&format!("/{collection}/{id}")))
            .query(&[("key", self.api_key.as_str())]);
        Self::write_checked(collection, req, true).await
    }

    async fn commit(&self, writes: Vec<BatchWrite>) -> Result<(), StoreError> {
        let collection = match writes.first() {
            Some(BatchWrite::Set { collection, .. }) | Some(BatchWrite::Delete { collection, .. }) => {
                collection.clone()
            }
            None => return Ok(()),
        };

        let mut encoded = Vec::with_capacity(writes.len());
        for write in &writes {
            encoded.push(match write {
                BatchWrite::Set {
                    collection,
                    id,
                    data,
                } => json!({
                    "update": {
                        "name": self.doc_name(collection, id),
                        "fields": object_fields(collection, data)?,
                    }
                }),
                BatchWrite::Delete { collection, id } => json!({ "delete": self.doc_name(collection, id) }),
            });
        }

        // Each chunk commits atomically; chunks are applied in order.
        let chunks = encoded.chunks(MAX_BATCH_WRITES).count();
        if chunks > 1 {
            tracing::warn!(
                collection = %collection,
                writes = encoded.len(),
                chunks,
                "batch exceeds one commit; applying in several commits"
            );
        }
        for chunk in encoded.chunks(MAX_BATCH_WRITES) {
            let req = self
                .client
                .post(format!("{}/{}:commit", self.base_url, self.root))
                .query(&[("key", self.api_key.as_str())])
                .json(&json!({ "writes": chunk }));
            Self::write_checked(&collection, req, false).await?;
        }
        Ok(())
    }
}
