use std::path::PathBuf;
use std::time::Duration;

/// Where the device position comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationSourceKind {
    /// Coordinates from `HADIR_DEVICE_LAT` / `HADIR_DEVICE_LNG`.
    Fixed,
    GeoClue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Local server API root. Overrides the persisted endpoint when set.
    pub server_endpoint: Option<String>,
    /// Path to the SQLite client-state database.
    pub state_db: PathBuf,
    pub firebase_project_id: Option<String>,
    pub firebase_api_key: Option<String>,
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    /// Per-request timeout for backend and descriptor-service calls.
    pub request_timeout: Duration,
    pub location_timeout: Duration,
    pub location_source: LocationSourceKind,
    pub device_lat: f64,
    pub device_lng: f64,
    pub descriptor_url: String,
    /// HMAC key for outcome signatures. Unsigned outcomes when unset.
    pub signing_key: Option<String>,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `HADIR_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("hadir");

        let state_db = std::env::var("HADIR_STATE_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("client-state.db"));

        Self {
            server_endpoint: env_opt("HADIR_SERVER_ENDPOINT"),
            state_db,
            firebase_project_id: env_opt("HADIR_FIREBASE_PROJECT_ID"),
            firebase_api_key: env_opt("HADIR_FIREBASE_API_KEY"),
            health_interval: Duration::from_secs(env_u64("HADIR_HEALTH_INTERVAL_SECS", 10)),
            probe_timeout: Duration::from_secs(env_u64("HADIR_PROBE_TIMEOUT_SECS", 3)),
            request_timeout: Duration::from_secs(env_u64("HADIR_REQUEST_TIMEOUT_SECS", 30)),
            location_timeout: Duration::from_secs(env_u64("HADIR_LOCATION_TIMEOUT_SECS", 10)),
            location_source: match std::env::var("HADIR_LOCATION_SOURCE").as_deref() {
                Ok("geoclue") => LocationSourceKind::GeoClue,
                _ => LocationSourceKind::Fixed,
            },
            device_lat: env_f64("HADIR_DEVICE_LAT", -6.2),
            device_lng: env_f64("HADIR_DEVICE_LNG", 106.81),
            descriptor_url: std::env::var("HADIR_DESCRIPTOR_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8088".to_string()),
            signing_key: env_opt("HADIR_SIGNING_KEY"),
            bus: match std::env::var("HADIR_BUS").as_deref() {
                Ok("system") => BusKind::System,
                _ => BusKind::Session,
            },
        }
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
