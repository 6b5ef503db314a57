//! hadir-core: attendance domain model and check-in policy.
//!
//! Haversine geofencing, the face-match decision rule, key-set
//! reconciliation for replace-all writes, and outcome signing.

pub mod geo;
pub mod matcher;
pub mod reconcile;
pub mod signing;
pub mod types;

pub use geo::{distance_meters, Coordinate, GeofenceDecision};
pub use matcher::{
    Descriptor, DescriptorExtractor, DescriptorMatcher, FaceMatcher, ImageRole, MatchVerdict,
    MatcherError, MATCH_DISTANCE_THRESHOLD,
};
pub use reconcile::{record_key, ReconcileError, ReconcilePlan};
pub use signing::OutcomeSigner;
pub use types::{
    AttendanceOutcome, AttendanceStatus, Collection, DailyActivity, FeedPost, GeofenceConfig,
    Identity, LeaveRequest, LeaveStatus, LeaveType, Record, Role, User,
};
