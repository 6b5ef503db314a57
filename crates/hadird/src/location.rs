//! Device position sources.

use async_trait::async_trait;
use hadir_core::Coordinate;
use std::time::Duration;
use thiserror::Error;
use zbus::zvariant::OwnedObjectPath;

#[derive(Error, Debug)]
pub enum LocationError {
    #[error("location service: {0}")]
    Service(#[from] zbus::Error),
}

/// A position fix. `accuracy_m` is the radius of uncertainty when known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub coordinate: Coordinate,
    pub accuracy_m: Option<f64>,
}

#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn current_position(&self) -> Result<Position, LocationError>;
}

/// A kiosk installed at a known spot.
pub struct FixedLocation {
    position: Position,
}

impl FixedLocation {
    pub fn new(coordinate: Coordinate) -> Self {
        Self {
            position: Position {
                coordinate,
                accuracy_m: Some(0.0),
            },
        }
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn current_position(&self) -> Result<Position, LocationError> {
        Ok(self.position)
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Manager",
    default_service = "org.freedesktop.GeoClue2",
    default_path = "/org/freedesktop/GeoClue2/Manager"
)]
trait GeoClueManager {
    fn get_client(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Client",
    default_service = "org.freedesktop.GeoClue2"
)]
trait GeoClueClient {
    fn start(&self) -> zbus::Result<()>;

    fn stop(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_desktop_id(&self, id: &str) -> zbus::Result<()>;

    #[zbus(property)]
    fn set_requested_accuracy_level(&self, level: u32) -> zbus::Result<()>;

    #[zbus(property)]
    fn location(&self) -> zbus::Result<OwnedObjectPath>;
}

#[zbus::proxy(
    interface = "org.freedesktop.GeoClue2.Location",
    default_service = "org.freedesktop.GeoClue2"
)]
trait GeoClueLocation {
    #[zbus(property)]
    fn latitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn longitude(&self) -> zbus::Result<f64>;

    #[zbus(property)]
    fn accuracy(&self) -> zbus::Result<f64>;
}

/// GCLUE_ACCURACY_LEVEL_EXACT
const ACCURACY_EXACT: u32 = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// GeoClue2 over the system bus. Each request starts a client, waits for
/// the first fix and stops it again. The caller bounds the wait.
pub struct GeoClueSource {
    conn: zbus::Connection,
    desktop_id: String,
}

impl GeoClueSource {
    pub async fn connect(desktop_id: impl Into<String>) -> Result<Self, LocationError> {
        Ok(Self {
            conn: zbus::Connection::system().await?,
            desktop_id: desktop_id.into(),
        })
    }

    async fn wait_for_fix(&self, client: &GeoClueClientProxy<'_>) -> Result<Position, LocationError> {
        loop {
            let path = client.location().await?;
            if path.as_str() != "/" {
                let loc = GeoClueLocationProxy::builder(&self.conn)
                    .path(path)?
                    .build()
                    .await?;
                let coordinate = Coordinate::new(loc.latitude().await?, loc.longitude().await?);
                let accuracy_m = loc.accuracy().await.ok();
                return Ok(Position {
                    coordinate,
                    accuracy_m,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl LocationSource for GeoClueSource {
    async fn current_position(&self) -> Result<Position, LocationError> {
        let manager = GeoClueManagerProxy::new(&self.conn).await?;
        let client_path = manager.get_client().await?;
        let client = GeoClueClientProxy::builder(&self.conn)
            .path(client_path)?
            .build()
            .await?;
        client.set_desktop_id(&self.desktop_id).await?;
        client.set_requested_accuracy_level(ACCURACY_EXACT).await?;
        client.start().await?;

        let fix = self.wait_for_fix(&client).await;
        if let Err(e) = client.stop().await {
            tracing::debug!(error = %e, "geoclue client stop failed");
        }
        let fix = fix?;
        tracing::debug!(
            lat = fix.coordinate.lat,
            lng = fix.coordinate.lng,
            accuracy_m = ?fix.accuracy_m,
            "geoclue fix"
        );
        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_location() {
        let source = FixedLocation::new(Coordinate::new(-6.2005, 106.8167));
        let pos = source.current_position().await.unwrap();
        assert_eq!(pos.coordinate, Coordinate::new(-6.2005, 106.8167));
        assert_eq!(pos.accuracy_m, Some(0.0));
    }
}
