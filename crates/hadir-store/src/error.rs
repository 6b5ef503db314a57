use hadir_core::ReconcileError;
use thiserror::Error;

use crate::mode::BackendMode;

/// Errors surfaced by storage backends and the gateway.
///
/// Nothing here is retried or swallowed by the store; callers decide.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{backend} backend unreachable: {reason}")]
    BackendUnreachable { backend: BackendMode, reason: String },
    #[error("write to {collection} failed on {backend} backend: {reason}")]
    WriteFailed {
        backend: BackendMode,
        collection: String,
        reason: String,
    },
    #[error("{backend} backend returned HTTP {status}: {body}")]
    Status {
        backend: BackendMode,
        status: u16,
        body: String,
    },
    #[error("malformed {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{op} on {collection} is not supported by the {backend} backend")]
    Unsupported {
        backend: BackendMode,
        collection: String,
        op: &'static str,
    },
    #[error("invalid record set: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl StoreError {
    pub(crate) fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            what: what.into(),
            source,
        }
    }

    /// True for transport-level failures (the backend could not be reached).
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::BackendUnreachable { .. })
    }
}

/// Errors from the durable client-state database.
#[derive(Error, Debug)]
pub enum ClientStateError {
    #[error("client state database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("client state directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed client state value for {key}: {reason}")]
    Malformed { key: String, reason: String },
}
