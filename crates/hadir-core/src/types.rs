use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::Coordinate;

/// Named record collections shared by every storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Logs,
    Leaves,
    Feeds,
    Activities,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Logs,
        Collection::Leaves,
        Collection::Feeds,
        Collection::Activities,
    ];

    /// Collection name on the wire and in the document store.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Logs => "logs",
            Collection::Leaves => "leaves",
            Collection::Feeds => "feeds",
            Collection::Activities => "activities",
        }
    }

    /// Numeric field used to order listings newest first, if any.
    pub fn order_field(self) -> Option<&'static str> {
        match self {
            Collection::Logs => Some("timestamp"),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A keyed record stored in one [`Collection`].
pub trait Record: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn key(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Stored employee record. The face reference and login subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub employee_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub photo_base64: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reports_to: Option<String>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub geofence_exempt: bool,
}

impl User {
    /// Project the stored record onto the identity used by a check-in session.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.employee_id.clone(),
            display_name: self.name.clone(),
            reference_image: self.photo_base64.clone(),
            geofence_exempt: self.geofence_exempt,
        }
    }

    /// Login matches on employee ID, or on name ignoring case, plus password.
    pub fn matches_login(&self, login_id: &str, password: &str) -> bool {
        let id_matches =
            self.employee_id == login_id || self.name.to_lowercase() == login_id.to_lowercase();
        id_matches && self.password.as_deref() == Some(password)
    }
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn key(&self) -> &str {
        &self.id
    }
}

/// The subject of a verification session.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub display_name: String,
    /// Enrolled face photo (base64 data URL).
    pub reference_image: String,
    pub geofence_exempt: bool,
}

/// Office geofence: a circle around the office centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeofenceConfig {
    #[serde(rename = "latitude")]
    pub center_lat: f64,
    #[serde(rename = "longitude")]
    pub center_lng: f64,
    #[serde(rename = "maxDistance")]
    pub max_distance_m: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            center_lat: -6.2,
            center_lng: 106.81,
            max_distance_m: 100.0,
        }
    }
}

impl GeofenceConfig {
    pub fn center(&self) -> Coordinate {
        Coordinate::new(self.center_lat, self.center_lng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Success,
    Failed,
}

/// One completed verification attempt, as persisted in the attendance log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceOutcome {
    pub id: String,
    #[serde(rename = "userId")]
    pub identity_id: String,
    #[serde(rename = "userName")]
    pub display_name: String,
    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub timestamp_utc: DateTime<Utc>,
    pub status: AttendanceStatus,
    #[serde(rename = "reason", default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,
    #[serde(rename = "distance")]
    pub measured_distance_m: f64,
    pub location: Coordinate,
    #[serde(rename = "capturedPhoto")]
    pub evidence_image: String,
    /// Hex HMAC-SHA256 over the canonical outcome fields, when signing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AttendanceOutcome {
    pub fn success(
        identity: &Identity,
        timestamp_utc: DateTime<Utc>,
        location: Coordinate,
        measured_distance_m: f64,
        evidence_image: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            timestamp_utc,
            status: AttendanceStatus::Success,
            reason_code: None,
            measured_distance_m,
            location,
            evidence_image,
            signature: None,
        }
    }
}

impl Record for AttendanceOutcome {
    const COLLECTION: Collection = Collection::Logs;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaveType {
    Cuti,
    Izin,
    Sakit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaveStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequest {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(rename = "type")]
    pub leave_type: LeaveType,
    pub start_date: String,
    pub end_date: String,
    pub reason: String,
    pub status: LeaveStatus,
    pub created_at: i64,
}

impl Record for LeaveRequest {
    const COLLECTION: Collection = Collection::Leaves;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPost {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_position: Option<String>,
    pub user_photo: String,
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub is_achievement: bool,
    #[serde(default)]
    pub likes: u32,
    #[serde(default)]
    pub comments: u32,
    pub created_at: i64,
}

impl Record for FeedPost {
    const COLLECTION: Collection = Collection::Feeds;

    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyActivity {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub task: String,
    pub start_time: String,
    pub end_time: String,
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stock_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Coordinate>,
    pub created_at: i64,
}

impl Record for DailyActivity {
    const COLLECTION: Collection = Collection::Activities;

    fn key(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            id: "u1".into(),
            name: "Siti Rahma".into(),
            employee_id: "E001".into(),
            password: Some("rahasia".into()),
            photo_base64: "data:image/jpeg;base64,AAAA".into(),
            role: Role::User,
            position: None,
            reports_to: None,
            created_at: 0,
            geofence_exempt: false,
        }
    }

    #[test]
    fn test_login_by_employee_id_or_name() {
        let u = user();
        assert!(u.matches_login("E001", "rahasia"));
        assert!(u.matches_login("siti rahma", "rahasia"));
        assert!(!u.matches_login("E001", "wrong"));
        assert!(!u.matches_login("E002", "rahasia"));
    }

    #[test]
    fn test_identity_projection() {
        let id = user().identity();
        assert_eq!(id.id, "E001");
        assert_eq!(id.display_name, "Siti Rahma");
        assert!(!id.geofence_exempt);
    }

    #[test]
    fn test_outcome_wire_format() {
        let identity = user().identity();
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        let outcome = AttendanceOutcome::success(
            &identity,
            at,
            Coordinate::new(-6.2005, 106.8167),
            55.7,
            "data:image/jpeg;base64,BBBB".into(),
        );
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["userId"], "E001");
        assert_eq!(json["userName"], "Siti Rahma");
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["distance"], 55.7);
        assert_eq!(json["location"]["lat"], -6.2005);
        assert!(json.get("reason").is_none());
        assert!(json.get("signature").is_none());
    }

    #[test]
    fn test_config_wire_keys() {
        let cfg: GeofenceConfig =
            serde_json::from_str(r#"{"latitude":1.5,"longitude":2.5,"maxDistance":50}"#).unwrap();
        assert_eq!(cfg.center(), Coordinate::new(1.5, 2.5));
        assert_eq!(cfg.max_distance_m, 50.0);
    }

    #[test]
    fn test_legacy_user_without_optional_fields() {
        let u: User = serde_json::from_str(
            r#"{"id":"1","name":"A","employeeId":"E9","photoBase64":"x","role":"admin","createdAt":1}"#,
        )
        .unwrap();
        assert_eq!(u.role, Role::Admin);
        assert!(u.password.is_none());
        assert!(!u.geofence_exempt);
    }

    #[test]
    fn test_collection_names_round_trip() {
        for c in Collection::ALL {
            assert_eq!(Collection::from_name(c.name()), Some(c));
        }
        assert_eq!(Collection::from_name("settings"), None);
    }
}
