//! hadir-server: the self-hosted backend.
//!
//! Serves every collection as JSON under `/api`, stored as one file per
//! collection. Replace-all writes reconcile by record key.

pub mod routes;
pub mod store;

pub use routes::{router, serve, ApiError, BODY_LIMIT_BYTES};
pub use store::{FileStore, FileStoreError, ReplaceSummary};
