use anyhow::{Context, Result};
use hadir_core::{Coordinate, DescriptorMatcher, FaceMatcher, OutcomeSigner};
use hadir_store::{
    Backend, ClientState, CloudBackend, DocumentStore, FirestoreConfig, FirestoreStore, HealthConfig,
    HealthMonitor, LocalBackend, MemoryDocumentStore, ModeWriter, StorageGateway, DEFAULT_ENDPOINT,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod checkin;
mod config;
mod dbus_interface;
mod face;
mod location;

use checkin::CheckInCoordinator;
use config::{BusKind, Config, LocationSourceKind};
use location::{FixedLocation, GeoClueSource, LocationSource};

const BUS_NAME: &str = "org.hadir.CheckIn1";
const OBJECT_PATH: &str = "/org/hadir/CheckIn1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("hadird starting");
    let config = Config::from_env();

    let state = ClientState::open(&config.state_db)
        .await
        .with_context(|| format!("failed to open client state at {}", config.state_db.display()))?;

    let endpoint = match &config.server_endpoint {
        Some(endpoint) => endpoint.clone(),
        None => state
            .endpoint()
            .await?
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
    };
    let local: Arc<dyn Backend> = Arc::new(LocalBackend::new(&endpoint, config.request_timeout)?);
    tracing::info!(endpoint = %endpoint, "local backend configured");

    let cloud_store = open_cloud_store(&config, &state).await?;
    let cloud: Arc<dyn Backend> = Arc::new(CloudBackend::new(cloud_store));

    let (writer, reader) = ModeWriter::restore(state.clone()).await?;
    let gateway = StorageGateway::new(reader, Arc::clone(&local), cloud);

    let monitor = HealthMonitor::new(
        local,
        writer,
        HealthConfig {
            interval: config.health_interval,
            probe_timeout: config.probe_timeout,
        },
    );
    monitor.bootstrap().await;
    let monitor = Arc::new(monitor.spawn());

    let location: Arc<dyn LocationSource> = match config.location_source {
        LocationSourceKind::Fixed => {
            tracing::info!(lat = config.device_lat, lng = config.device_lng, "fixed device location");
            Arc::new(FixedLocation::new(Coordinate::new(config.device_lat, config.device_lng)))
        }
        LocationSourceKind::GeoClue => Arc::new(
            GeoClueSource::connect("hadird")
                .await
                .context("failed to connect to GeoClue2")?,
        ),
    };

    let matcher: Arc<dyn FaceMatcher> = Arc::new(DescriptorMatcher::new(
        face::HttpDescriptorExtractor::new(&config.descriptor_url, config.request_timeout)?,
    ));
    tracing::info!(url = %config.descriptor_url, "descriptor service configured");

    let mut coordinator = CheckInCoordinator::new(
        Arc::new(gateway.clone()),
        location,
        matcher,
        config.location_timeout,
    );
    match &config.signing_key {
        Some(key) => coordinator = coordinator.with_signer(OutcomeSigner::new(key.as_bytes())),
        None => tracing::warn!("HADIR_SIGNING_KEY not set; attendance outcomes will be unsigned"),
    }

    let service = dbus_interface::CheckInService {
        coordinator: Arc::new(coordinator),
        gateway,
        monitor: Arc::clone(&monitor),
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "hadird ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("hadird shutting down");

    drop(conn);
    if let Ok(monitor) = Arc::try_unwrap(monitor) {
        monitor.shutdown().await;
    }

    Ok(())
}

/// Firestore when a project is configured (environment first, then the
/// persisted client state), otherwise an in-process store.
async fn open_cloud_store(config: &Config, state: &ClientState) -> Result<Arc<dyn DocumentStore>> {
    let from_env = match (&config.firebase_project_id, &config.firebase_api_key) {
        (Some(project_id), Some(api_key)) => Some(FirestoreConfig {
            project_id: project_id.clone(),
            api_key: api_key.clone(),
            base_url: None,
        }),
        _ => None,
    };

    let firestore = match from_env {
        Some(fs) => {
            state.set_firestore_config(&fs).await?;
            Some(fs)
        }
        None => state.firestore_config().await?,
    };

    let store: Arc<dyn DocumentStore> = match firestore {
        Some(fs) => {
            tracing::info!(project = %fs.project_id, "cloud backend: firestore");
            Arc::new(FirestoreStore::new(&fs, config.request_timeout)?)
        }
        None => {
            tracing::warn!("no cloud project configured; cloud backend is in-memory only");
            Arc::new(MemoryDocumentStore::new())
        }
    };
    Ok(store)
}
