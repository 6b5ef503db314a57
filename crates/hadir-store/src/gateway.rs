//! Uniform record access over whichever backend is active.

use hadir_core::{
    AttendanceOutcome, DailyActivity, FeedPost, GeofenceConfig, LeaveRequest, Record, User,
};
use serde_json::Value;
use std::sync::Arc;

use crate::backend::Backend;
use crate::error::StoreError;
use crate::mode::{BackendMode, ModeReader};

/// Every collection, fetched together after a backend switch.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub mode: BackendMode,
    pub users: Vec<User>,
    pub config: GeofenceConfig,
    pub logs: Vec<AttendanceOutcome>,
    pub leaves: Vec<LeaveRequest>,
    pub feeds: Vec<FeedPost>,
    pub activities: Vec<DailyActivity>,
}

/// Dispatches each call to the backend selected by the current mode.
///
/// The mode is read once at the start of a call; a switch while the call is
/// in flight does not move it to the other backend.
#[derive(Clone)]
pub struct StorageGateway {
    mode: ModeReader,
    local: Arc<dyn Backend>,
    cloud: Arc<dyn Backend>,
}

impl StorageGateway {
    pub fn new(mode: ModeReader, local: Arc<dyn Backend>, cloud: Arc<dyn Backend>) -> Self {
        Self { mode, local, cloud }
    }

    pub fn mode(&self) -> BackendMode {
        self.mode.current()
    }

    /// A receiver that resolves on every backend switch. Holders should
    /// re-fetch with [`load_all`](Self::load_all) when it fires.
    pub fn reload_signal(&self) -> ModeReader {
        self.mode.clone()
    }

    fn route(&self) -> (BackendMode, Arc<dyn Backend>) {
        let mode = self.mode.current();
        let backend = match mode {
            BackendMode::Local => Arc::clone(&self.local),
            BackendMode::Cloud => Arc::clone(&self.cloud),
        };
        (mode, backend)
    }

    pub async fn list<R: Record>(&self) -> Result<Vec<R>, StoreError> {
        let (mode, backend) = self.route();
        let records = list_on::<R>(backend.as_ref()).await?;
        tracing::debug!(collection = %R::COLLECTION, %mode, count = records.len(), "list");
        Ok(records)
    }

    pub async fn append<R: Record>(&self, record: &R) -> Result<(), StoreError> {
        let value = to_value(record)?;
        let (mode, backend) = self.route();
        backend.append(R::COLLECTION, value).await?;
        tracing::debug!(collection = %R::COLLECTION, %mode, key = record.key(), "appended");
        Ok(())
    }

    /// Make the stored collection equal to `records` (deletions included).
    pub async fn replace<R: Record>(&self, records: &[R]) -> Result<(), StoreError> {
        let values = records.iter().map(to_value).collect::<Result<Vec<Value>, _>>()?;
        let (mode, backend) = self.route();
        backend.replace_all(R::COLLECTION, values).await?;
        tracing::info!(collection = %R::COLLECTION, %mode, count = records.len(), "replaced collection");
        Ok(())
    }

    pub async fn get_users(&self) -> Result<Vec<User>, StoreError> {
        self.list().await
    }

    pub async fn save_users(&self, users: &[User]) -> Result<(), StoreError> {
        self.replace(users).await
    }

    pub async fn get_config(&self) -> Result<GeofenceConfig, StoreError> {
        let (_, backend) = self.route();
        backend.load_config().await
    }

    pub async fn save_config(&self, config: &GeofenceConfig) -> Result<(), StoreError> {
        let (mode, backend) = self.route();
        backend.store_config(config).await?;
        tracing::info!(
            %mode,
            lat = config.center_lat,
            lng = config.center_lng,
            max_distance_m = config.max_distance_m,
            "office geofence updated"
        );
        Ok(())
    }

    pub async fn get_logs(&self) -> Result<Vec<AttendanceOutcome>, StoreError> {
        self.list().await
    }

    pub async fn add_log(&self, outcome: &AttendanceOutcome) -> Result<(), StoreError> {
        self.append(outcome).await
    }

    pub async fn replace_logs(&self, logs: &[AttendanceOutcome]) -> Result<(), StoreError> {
        self.replace(logs).await
    }

    pub async fn get_leaves(&self) -> Result<Vec<LeaveRequest>, StoreError> {
        self.list().await
    }

    pub async fn add_leave(&self, leave: &LeaveRequest) -> Result<(), StoreError> {
        self.append(leave).await
    }

    pub async fn replace_leaves(&self, leaves: &[LeaveRequest]) -> Result<(), StoreError> {
        self.replace(leaves).await
    }

    pub async fn get_feeds(&self) -> Result<Vec<FeedPost>, StoreError> {
        self.list().await
    }

    pub async fn add_feed(&self, post: &FeedPost) -> Result<(), StoreError> {
        self.append(post).await
    }

    pub async fn get_activities(&self) -> Result<Vec<DailyActivity>, StoreError> {
        self.list().await
    }

    pub async fn add_activity(&self, activity: &DailyActivity) -> Result<(), StoreError> {
        self.append(activity).await
    }

    /// Fetch every collection concurrently from the active backend.
    ///
    /// The mode is sampled once, so a snapshot never mixes backends.
    pub async fn load_all(&self) -> Result<Snapshot, StoreError> {
        let (mode, backend) = self.route();
        let backend = backend.as_ref();
        let (users, config, logs, leaves, feeds, activities) = tokio::try_join!(
            list_on::<User>(backend),
            backend.load_config(),
            list_on::<AttendanceOutcome>(backend),
            list_on::<LeaveRequest>(backend),
            list_on::<FeedPost>(backend),
            list_on::<DailyActivity>(backend),
        )?;
        tracing::info!(
            %mode,
            users = users.len(),
            logs = logs.len(),
            leaves = leaves.len(),
            "loaded all collections"
        );
        Ok(Snapshot {
            mode,
            users,
            config,
            logs,
            leaves,
            feeds,
            activities,
        })
    }
}

async fn list_on<R: Record>(backend: &dyn Backend) -> Result<Vec<R>, StoreError> {
    backend
        .list(R::COLLECTION)
        .await?
        .into_iter()
        .map(|v| {
            serde_json::from_value(v).map_err(|e| StoreError::decode(format!("{} record", R::COLLECTION), e))
        })
        .collect()
}

fn to_value<R: Record>(record: &R) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::decode(format!("{} record", R::COLLECTION), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{CloudBackend, MemoryDocumentStore};
    use crate::mode::{mode_channel, ModeChangeCause};
    use chrono::{TimeZone, Utc};
    use async_trait::async_trait;
    use hadir_core::{AttendanceStatus, Collection, Coordinate, Role};
    use tokio::sync::Notify;

    /// Holds every append until released.
    struct GatedBackend {
        inner: CloudBackend,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Backend for GatedBackend {
        async fn list(&self, collection: Collection) -> Result<Vec<Value>, StoreError> {
            self.inner.list(collection).await
        }

        async fn append(&self, collection: Collection, record: Value) -> Result<(), StoreError> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.append(collection, record).await
        }

        async fn replace_all(&self, collection: Collection, records: Vec<Value>) -> Result<(), StoreError> {
            self.inner.replace_all(collection, records).await
        }

        async fn load_config(&self) -> Result<GeofenceConfig, StoreError> {
            self.inner.load_config().await
        }

        async fn store_config(&self, config: &GeofenceConfig) -> Result<(), StoreError> {
            self.inner.store_config(config).await
        }

        async fn health(&self) -> Result<(), StoreError> {
            self.inner.health().await
        }
    }

    struct Fixture {
        writer: crate::mode::ModeWriter,
        local: Arc<MemoryDocumentStore>,
        cloud: Arc<MemoryDocumentStore>,
        gateway: StorageGateway,
    }

    fn fixture(initial: BackendMode) -> Fixture {
        let (writer, reader) = mode_channel(initial);
        let local = Arc::new(MemoryDocumentStore::new());
        let cloud = Arc::new(MemoryDocumentStore::new());
        let gateway = StorageGateway::new(
            reader,
            Arc::new(CloudBackend::new(local.clone())),
            Arc::new(CloudBackend::new(cloud.clone())),
        );
        Fixture {
            writer,
            local,
            cloud,
            gateway,
        }
    }

    fn outcome(id: &str, ts_ms: i64) -> AttendanceOutcome {
        AttendanceOutcome {
            id: id.into(),
            identity_id: "E001".into(),
            display_name: "Siti".into(),
            timestamp_utc: Utc.timestamp_millis_opt(ts_ms).unwrap(),
            status: AttendanceStatus::Success,
            reason_code: None,
            measured_distance_m: 12.5,
            location: Coordinate { lat: -6.2, lng: 106.8 },
            evidence_image: "data:image/jpeg;base64,AA".into(),
            signature: None,
        }
    }

    fn user(id: &str) -> User {
        User {
            id: id.into(),
            name: format!("user {id}"),
            employee_id: format!("E-{id}"),
            password: None,
            photo_base64: String::new(),
            role: Role::User,
            position: None,
            reports_to: None,
            created_at: 0,
            geofence_exempt: false,
        }
    }

    #[tokio::test]
    async fn test_replace_logs_deletes_missing_keys() {
        let f = fixture(BackendMode::Local);
        let (a, b) = (outcome("a", 1), outcome("b", 2));
        f.gateway.replace_logs(&[a, b.clone()]).await.unwrap();
        f.gateway.replace_logs(&[b.clone()]).await.unwrap();
        assert_eq!(f.gateway.get_logs().await.unwrap(), vec![b]);
        assert_eq!(f.local.ids("logs"), vec!["b".to_string()]);
        assert!(f.cloud.ids("logs").is_empty());
    }

    #[tokio::test]
    async fn test_reads_follow_mode_switch() {
        let f = fixture(BackendMode::Local);
        f.gateway.save_users(&[user("local-only")]).await.unwrap();

        f.writer.set(BackendMode::Cloud, ModeChangeCause::ProbeFailed).await;
        assert_eq!(f.gateway.mode(), BackendMode::Cloud);
        assert!(f.gateway.get_users().await.unwrap().is_empty());

        f.gateway.save_users(&[user("cloud-only")]).await.unwrap();
        assert_eq!(f.cloud.ids("users"), vec!["cloud-only".to_string()]);
        assert_eq!(f.local.ids("users"), vec!["local-only".to_string()]);
    }

    #[tokio::test]
    async fn test_in_flight_write_stays_on_its_backend() {
        let (writer, reader) = mode_channel(BackendMode::Local);
        let local = Arc::new(MemoryDocumentStore::new());
        let cloud = Arc::new(MemoryDocumentStore::new());
        let gated = Arc::new(GatedBackend {
            inner: CloudBackend::new(local.clone()),
            entered: Notify::new(),
            release: Notify::new(),
        });
        let gateway = StorageGateway::new(
            reader,
            gated.clone(),
            Arc::new(CloudBackend::new(cloud.clone())),
        );

        let pending = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.add_log(&outcome("in-flight", 1)).await }
        });
        gated.entered.notified().await;

        writer.set(BackendMode::Cloud, ModeChangeCause::ProbeFailed).await;
        assert_eq!(gateway.mode(), BackendMode::Cloud);
        gated.release.notify_one();
        pending.await.unwrap().unwrap();

        assert_eq!(local.ids("logs"), vec!["in-flight".to_string()]);
        assert!(cloud.ids("logs").is_empty());

        gateway.add_log(&outcome("after", 2)).await.unwrap();
        assert_eq!(cloud.ids("logs"), vec!["after".to_string()]);
    }

    #[tokio::test]
    async fn test_read_error_propagates() {
        let f = fixture(BackendMode::Cloud);
        f.cloud.set_available(false);
        let err = f.gateway.get_logs().await.unwrap_err();
        assert!(err.is_unreachable());
    }

    #[tokio::test]
    async fn test_load_all_snapshot() {
        let f = fixture(BackendMode::Cloud);
        f.gateway.add_log(&outcome("old", 100)).await.unwrap();
        f.gateway.add_log(&outcome("new", 200)).await.unwrap();

        let mut reload = f.gateway.reload_signal();
        f.writer.set(BackendMode::Local, ModeChangeCause::Operator).await;
        assert_eq!(reload.changed().await, Some(BackendMode::Local));
        f.writer.set(BackendMode::Cloud, ModeChangeCause::Operator).await;

        let snap = f.gateway.load_all().await.unwrap();
        assert_eq!(snap.mode, BackendMode::Cloud);
        let ids: Vec<_> = snap.logs.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
        assert_eq!(snap.config, GeofenceConfig::default());
        assert!(snap.users.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_record_is_an_error() {
        let f = fixture(BackendMode::Local);
        f.gateway
            .route()
            .1
            .append(Collection::Leaves, serde_json::json!({"id": "x"}))
            .await
            .unwrap();
        assert!(matches!(
            f.gateway.get_leaves().await,
            Err(StoreError::Decode { .. })
        ));
    }
}
