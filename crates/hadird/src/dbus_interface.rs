use hadir_store::{BackendMode, MonitorHandle, StorageGateway};
use serde_json::{json, Value};
use std::sync::Arc;
use zbus::interface;

use crate::checkin::{CheckInCoordinator, CheckInState, RunReport};

/// D-Bus interface for the check-in daemon.
///
/// Bus name: org.hadir.CheckIn1
/// Object path: /org/hadir/CheckIn1
pub struct CheckInService {
    pub coordinator: Arc<CheckInCoordinator>,
    pub gateway: StorageGateway,
    pub monitor: Arc<MonitorHandle>,
}

fn failed(e: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(e.to_string())
}

fn state_json(state: &CheckInState) -> Value {
    let mut v = json!({ "state": state.name(), "inFlight": state.is_in_flight() });
    match state {
        CheckInState::Error(reason) => {
            v["code"] = json!(reason.code());
            v["reason"] = json!(reason.to_string());
        }
        CheckInState::Success(outcome) => {
            // The evidence photo is left out; it can be megabytes.
            v["outcome"] = json!({
                "id": outcome.id,
                "userId": outcome.identity_id,
                "userName": outcome.display_name,
                "timestamp": outcome.timestamp_utc.timestamp_millis(),
                "distance": outcome.measured_distance_m,
                "location": outcome.location,
                "signature": outcome.signature,
            });
        }
        _ => {}
    }
    v
}

#[interface(name = "org.hadir.CheckIn1")]
impl CheckInService {
    /// Start a session for the user with this employee ID (or name) and password.
    async fn login(&self, login_id: &str, password: &str) -> zbus::fdo::Result<String> {
        tracing::info!(login_id, "login requested");
        let users = self.gateway.get_users().await.map_err(failed)?;
        let identity = self
            .coordinator
            .login(&users, login_id, password)
            .ok_or_else(|| zbus::fdo::Error::AuthFailed("invalid employee ID or password".into()))?;
        Ok(json!({
            "identityId": identity.id,
            "displayName": identity.display_name,
            "geofenceExempt": identity.geofence_exempt,
        })
        .to_string())
    }

    /// Run one verification attempt with the captured photo (data URL).
    async fn check_in(&self, image: String) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "check-in requested");
        match self.coordinator.run(image).await.map_err(failed)? {
            RunReport::Ignored => Ok(json!({ "ignored": true, "state": self.coordinator.state().name() }).to_string()),
            RunReport::Finished(state) => Ok(state_json(&state).to_string()),
        }
    }

    /// Clear a failed attempt so the session can try again.
    async fn retry(&self) -> bool {
        self.coordinator.retry()
    }

    /// Drop the current session.
    async fn reset(&self) {
        self.coordinator.reset();
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.coordinator.status();
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": self.monitor.mode(),
            "connected": self.monitor.connected(),
            "identity": status.identity.as_ref().map(|i| json!({
                "id": i.id,
                "displayName": i.display_name,
            })),
            "session": state_json(&status.state),
        })
        .to_string())
    }

    /// Operator override of the storage backend (`LOCAL` or `CLOUD`).
    async fn set_backend_mode(&self, mode: &str) -> zbus::fdo::Result<bool> {
        let mode: BackendMode = mode
            .parse()
            .map_err(|e: hadir_store::mode::UnknownMode| zbus::fdo::Error::InvalidArgs(e.to_string()))?;
        tracing::info!(mode = %mode, "backend override requested");
        self.monitor.override_mode(mode).await.map_err(failed)
    }

    /// Re-fetch every collection from the active backend and summarise it.
    /// Clients call this when `Status` reports a different backend.
    async fn reload(&self) -> zbus::fdo::Result<String> {
        let snap = self.gateway.load_all().await.map_err(failed)?;
        Ok(json!({
            "backend": snap.mode,
            "users": snap.users.len(),
            "logs": snap.logs.len(),
            "leaves": snap.leaves.len(),
            "feeds": snap.feeds.len(),
            "activities": snap.activities.len(),
            "config": snap.config,
        })
        .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkin::FailureReason;

    #[test]
    fn test_state_json_error() {
        let v = state_json(&CheckInState::Error(FailureReason::OutOfRange {
            distance_m: 150.4,
            max_distance_m: 100.0,
        }));
        assert_eq!(v["state"], "ERROR");
        assert_eq!(v["code"], "OUT_OF_RANGE");
        assert_eq!(v["inFlight"], false);
        assert!(v["reason"].as_str().unwrap().contains("150 m"));
    }

    #[test]
    fn test_state_json_in_flight() {
        let v = state_json(&CheckInState::MatchingFace);
        assert_eq!(v["state"], "MATCHING_FACE");
        assert_eq!(v["inFlight"], true);
        assert!(v.get("outcome").is_none());
    }
}
