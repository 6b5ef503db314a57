use chrono::{TimeZone, Utc};
use hadir_core::{AttendanceOutcome, AttendanceStatus, Collection, Coordinate, GeofenceConfig};
use hadir_store::{
    mode_channel, Backend, BackendMode, CloudBackend, HealthConfig, HealthMonitor, LocalBackend,
    MemoryDocumentStore, StorageGateway,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

struct Server {
    endpoint: String,
    shutdown: Option<oneshot::Sender<()>>,
    _dir: tempfile::TempDir,
}

impl Server {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = hadir_server::FileStore::open(dir.path()).await.unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(hadir_server::serve(listener, Arc::new(store), async {
            let _ = rx.await;
        }));
        Self {
            endpoint: format!("http://{addr}/api"),
            shutdown: Some(tx),
            _dir: dir,
        }
    }

    fn backend(&self) -> LocalBackend {
        LocalBackend::new(&self.endpoint, Duration::from_secs(5)).unwrap()
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn outcome(id: &str, ts_ms: i64) -> AttendanceOutcome {
    AttendanceOutcome {
        id: id.into(),
        identity_id: "E001".into(),
        display_name: "Siti Rahma".into(),
        timestamp_utc: Utc.timestamp_millis_opt(ts_ms).unwrap(),
        status: AttendanceStatus::Success,
        reason_code: None,
        measured_distance_m: 55.7,
        location: Coordinate {
            lat: -6.2005,
            lng: 106.8167,
        },
        evidence_image: "data:image/jpeg;base64,AAAA".into(),
        signature: None,
    }
}

#[tokio::test]
async fn test_health_and_config_round_trip() {
    let server = Server::start().await;
    let local = server.backend();

    local.health().await.unwrap();
    assert_eq!(local.load_config().await.unwrap(), GeofenceConfig::default());

    let cfg = GeofenceConfig {
        center_lat: -6.2,
        center_lng: 106.816666,
        max_distance_m: 100.0,
    };
    local.store_config(&cfg).await.unwrap();
    assert_eq!(local.load_config().await.unwrap(), cfg);
}

#[tokio::test]
async fn test_replace_logs_honours_deletion_on_local() {
    let server = Server::start().await;
    let (_writer, reader) = mode_channel(BackendMode::Local);
    let gateway = StorageGateway::new(
        reader,
        Arc::new(server.backend()),
        Arc::new(CloudBackend::new(Arc::new(MemoryDocumentStore::new()))),
    );

    let (a, b) = (outcome("a", 1_000), outcome("b", 2_000));
    gateway.replace_logs(&[a, b.clone()]).await.unwrap();
    gateway.replace_logs(&[b.clone()]).await.unwrap();
    assert_eq!(gateway.get_logs().await.unwrap(), vec![b]);
}

#[tokio::test]
async fn test_appended_logs_come_back_newest_first() {
    let server = Server::start().await;
    let local = server.backend();
    local
        .append(Collection::Logs, json!({"id": "first", "timestamp": 1}))
        .await
        .unwrap();
    local
        .append(Collection::Logs, json!({"id": "second", "timestamp": 2}))
        .await
        .unwrap();
    let logs = local.list(Collection::Logs).await.unwrap();
    assert_eq!(logs[0]["id"], "second");
    assert_eq!(logs[1]["id"], "first");
}

#[tokio::test]
async fn test_keyless_replace_is_rejected_before_sending() {
    let server = Server::start().await;
    let local = server.backend();
    let err = local
        .replace_all(Collection::Leaves, vec![json!({"reason": "no id"})])
        .await
        .unwrap_err();
    assert!(matches!(err, hadir_store::StoreError::Reconcile(_)), "{err}");
}

#[tokio::test]
async fn test_server_loss_fails_over_after_one_probe() {
    let mut server = Server::start().await;
    let local: Arc<dyn Backend> = Arc::new(server.backend());
    let (writer, reader) = mode_channel(BackendMode::Local);
    let cloud = Arc::new(MemoryDocumentStore::new());
    let gateway = StorageGateway::new(
        reader,
        Arc::clone(&local),
        Arc::new(CloudBackend::new(cloud.clone())),
    );
    let monitor = HealthMonitor::new(
        local,
        writer,
        HealthConfig {
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
        },
    );

    server.backend().health().await.unwrap();
    server.stop();
    // Give the listener a moment to close.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(monitor.tick().await, Some(BackendMode::Cloud));
    assert_eq!(gateway.mode(), BackendMode::Cloud);
    // Served by the (empty) cloud store now.
    assert!(gateway.get_users().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rejected_write_is_write_failed_not_unreachable() {
    let server = Server::start().await;
    let local = server.backend();
    let err = local
        .append(Collection::Logs, json!("not a record"))
        .await
        .unwrap_err();
    assert!(matches!(err, hadir_store::StoreError::WriteFailed { .. }), "{err}");
    assert!(!err.is_unreachable());
}
