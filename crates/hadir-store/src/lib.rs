//! hadir-store: record storage with health-triggered failover.
//!
//! Two backends sit behind one [`StorageGateway`]: the self-hosted HTTP
//! server on the office network and a managed cloud document store. The
//! [`HealthMonitor`] is the only writer of the active [`BackendMode`].

pub mod backend;
pub mod client_state;
pub mod cloud;
pub mod error;
pub mod firestore;
pub mod gateway;
pub mod health;
pub mod local;
pub mod mode;

pub use backend::Backend;
pub use client_state::ClientState;
pub use cloud::{BatchWrite, CloudBackend, Document, DocumentStore, MemoryDocumentStore};
pub use error::{ClientStateError, StoreError};
pub use firestore::{FirestoreConfig, FirestoreStore};
pub use gateway::{Snapshot, StorageGateway};
pub use health::{HealthConfig, HealthMonitor, MonitorError, MonitorHandle};
pub use local::{LocalBackend, DEFAULT_ENDPOINT};
pub use mode::{mode_channel, BackendMode, ModeChangeCause, ModeReader, ModeWriter};
