//! Check-in verification state machine.
//!
//! `Idle → AcquiringLocation → EvaluatingGeofence → MatchingFace → Success`,
//! with any step able to end in `Error`. Verification failures end the
//! attempt in `Error` and are reported, never returned as `Err`; storage
//! failures do both. Nothing retries automatically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hadir_core::{
    AttendanceOutcome, FaceMatcher, GeofenceConfig, Identity, MatcherError, OutcomeSigner, User,
};
use hadir_store::{StorageGateway, StoreError};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::location::LocationSource;

/// Why an attempt ended in `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    NoIdentity,
    LocationUnavailable(String),
    OutOfRange { distance_m: f64, max_distance_m: f64 },
    /// Which photo had no face.
    FaceNotDetected(String),
    FaceMismatch { score: f32 },
    MatcherUnavailable(String),
    BackendUnreachable(String),
    /// The office config was reached but could not be read.
    ConfigUnavailable(String),
    WriteFailed(String),
}

impl FailureReason {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoIdentity => "NO_IDENTITY",
            Self::LocationUnavailable(_) => "LOCATION_UNAVAILABLE",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::FaceNotDetected(_) => "FACE_NOT_DETECTED",
            Self::FaceMismatch { .. } => "FACE_MISMATCH",
            Self::MatcherUnavailable(_) => "MATCHER_UNAVAILABLE",
            Self::BackendUnreachable(_) => "BACKEND_UNREACHABLE",
            Self::ConfigUnavailable(_) => "CONFIG_UNAVAILABLE",
            Self::WriteFailed(_) => "WRITE_FAILED",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoIdentity => f.write_str("no identity selected; log in first"),
            Self::LocationUnavailable(e) => write!(f, "location unavailable: {e}"),
            Self::OutOfRange {
                distance_m,
                max_distance_m,
            } => write!(
                f,
                "outside the office area: {distance_m:.0} m from the office (limit {max_distance_m:.0} m)"
            ),
            Self::FaceNotDetected(which) => write!(f, "no face detected in the {which}"),
            Self::FaceMismatch { score } => write!(f, "face does not match (similarity {score:.0}%)"),
            Self::MatcherUnavailable(e) => write!(f, "face matcher unavailable: {e}"),
            Self::BackendUnreachable(e) => write!(f, "storage unreachable: {e}"),
            Self::ConfigUnavailable(e) => write!(f, "office settings could not be loaded: {e}"),
            Self::WriteFailed(e) => write!(f, "attendance could not be saved: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckInState {
    Idle,
    AcquiringLocation,
    EvaluatingGeofence,
    MatchingFace,
    Success(AttendanceOutcome),
    Error(FailureReason),
}

impl CheckInState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::AcquiringLocation => "ACQUIRING_LOCATION",
            Self::EvaluatingGeofence => "EVALUATING_GEOFENCE",
            Self::MatchingFace => "MATCHING_FACE",
            Self::Success(_) => "SUCCESS",
            Self::Error(_) => "ERROR",
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::AcquiringLocation | Self::EvaluatingGeofence | Self::MatchingFace
        )
    }
}

/// What `run` did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunReport {
    /// Another attempt is in flight, or the session is not idle.
    Ignored,
    Finished(CheckInState),
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The storage the coordinator needs: the office geofence and the log.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    async fn office_config(&self) -> Result<GeofenceConfig, StoreError>;

    async fn record(&self, outcome: &AttendanceOutcome) -> Result<(), StoreError>;
}

#[async_trait]
impl AttendanceStore for StorageGateway {
    async fn office_config(&self) -> Result<GeofenceConfig, StoreError> {
        self.get_config().await
    }

    async fn record(&self, outcome: &AttendanceOutcome) -> Result<(), StoreError> {
        self.add_log(outcome).await
    }
}

struct Session {
    /// Bumped whenever the session is replaced or dropped.
    epoch: u64,
    identity: Option<Identity>,
    state: CheckInState,
}

/// Point-in-time view of the session.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub identity: Option<Identity>,
    pub state: CheckInState,
}

pub struct CheckInCoordinator {
    store: Arc<dyn AttendanceStore>,
    location: Arc<dyn LocationSource>,
    matcher: Arc<dyn FaceMatcher>,
    clock: Arc<dyn Clock>,
    signer: Option<OutcomeSigner>,
    location_timeout: Duration,
    session: Mutex<Session>,
}

impl CheckInCoordinator {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        location: Arc<dyn LocationSource>,
        matcher: Arc<dyn FaceMatcher>,
        location_timeout: Duration,
    ) -> Self {
        Self {
            store,
            location,
            matcher,
            clock: Arc::new(SystemClock),
            signer: None,
            location_timeout,
            session: Mutex::new(Session {
                epoch: 0,
                identity: None,
                state: CheckInState::Idle,
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_signer(mut self, signer: OutcomeSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Start a fresh session for `identity`, replacing any previous one.
    pub fn select_identity(&self, identity: Identity) {
        let mut s = self.lock();
        tracing::info!(identity = %identity.id, "session started");
        s.epoch += 1;
        s.identity = Some(identity);
        s.state = CheckInState::Idle;
    }

    /// Match `login_id` against employee ID or name (case-insensitive) plus
    /// password, and start a session for the user found.
    pub fn login(&self, users: &[User], login_id: &str, password: &str) -> Option<Identity> {
        let Some(user) = users.iter().find(|u| u.matches_login(login_id, password)) else {
            tracing::info!(login_id, "login rejected");
            return None;
        };
        let identity = user.identity();
        self.select_identity(identity.clone());
        Some(identity)
    }

    /// `Error → Idle`, keeping the identity. Returns false in any other state.
    pub fn retry(&self) -> bool {
        let mut s = self.lock();
        if matches!(s.state, CheckInState::Error(_)) {
            s.state = CheckInState::Idle;
            true
        } else {
            false
        }
    }

    /// Drop the session (acknowledge a result, or log out).
    pub fn reset(&self) {
        let mut s = self.lock();
        s.epoch += 1;
        s.identity = None;
        s.state = CheckInState::Idle;
        tracing::info!("session reset");
    }

    pub fn state(&self) -> CheckInState {
        self.lock().state.clone()
    }

    pub fn status(&self) -> SessionStatus {
        let s = self.lock();
        SessionStatus {
            identity: s.identity.clone(),
            state: s.state.clone(),
        }
    }

    /// Apply a transition unless the session changed underneath the attempt.
    fn advance(&self, epoch: u64, state: CheckInState) {
        let mut s = self.lock();
        if s.epoch != epoch {
            tracing::debug!(state = state.name(), "session replaced mid-attempt; transition dropped");
            return;
        }
        tracing::info!(state = state.name(), "check-in state");
        s.state = state;
    }

    fn fail(&self, epoch: u64, reason: FailureReason) -> RunReport {
        tracing::warn!(code = reason.code(), reason = %reason, "check-in failed");
        let state = CheckInState::Error(reason);
        self.advance(epoch, state.clone());
        RunReport::Finished(state)
    }

    /// One verification attempt for the selected identity.
    ///
    /// A call while another attempt is in flight, or while the session sits in
    /// `Success`/`Error`, is ignored.
    pub async fn run(&self, captured_image: String) -> Result<RunReport, StoreError> {
        let (epoch, identity) = {
            let mut s = self.lock();
            if s.state != CheckInState::Idle {
                tracing::debug!(state = s.state.name(), "check-in ignored");
                return Ok(RunReport::Ignored);
            }
            let Some(identity) = s.identity.clone() else {
                tracing::warn!("check-in without a selected identity");
                s.state = CheckInState::Error(FailureReason::NoIdentity);
                return Ok(RunReport::Finished(s.state.clone()));
            };
            s.state = CheckInState::AcquiringLocation;
            (s.epoch, identity)
        };
        tracing::info!(identity = %identity.id, "check-in started");

        // Read fresh every attempt so an admin change applies immediately.
        let config = match self.store.office_config().await {
            Ok(config) => config,
            Err(e) => {
                let reason = if e.is_unreachable() {
                    FailureReason::BackendUnreachable(e.to_string())
                } else {
                    FailureReason::ConfigUnavailable(e.to_string())
                };
                self.fail(epoch, reason);
                return Err(e);
            }
        };

        let position = match tokio::time::timeout(self.location_timeout, self.location.current_position()).await {
            Ok(Ok(position)) => position,
            Ok(Err(e)) => return Ok(self.fail(epoch, FailureReason::LocationUnavailable(e.to_string()))),
            Err(_) => {
                let reason = format!("no position fix within {}s", self.location_timeout.as_secs_f32());
                return Ok(self.fail(epoch, FailureReason::LocationUnavailable(reason)));
            }
        };

        self.advance(epoch, CheckInState::EvaluatingGeofence);
        let decision = config.evaluate(position.coordinate);
        tracing::info!(
            distance_m = decision.distance_m,
            max_distance_m = config.max_distance_m,
            within = decision.within,
            accuracy_m = ?position.accuracy_m,
            "geofence evaluated"
        );
        if !decision.within {
            if identity.geofence_exempt {
                tracing::info!(identity = %identity.id, "outside geofence; identity is exempt");
            } else {
                return Ok(self.fail(
                    epoch,
                    FailureReason::OutOfRange {
                        distance_m: decision.distance_m,
                        max_distance_m: config.max_distance_m,
                    },
                ));
            }
        }

        self.advance(epoch, CheckInState::MatchingFace);
        let verdict = match self.matcher.compare(&identity.reference_image, &captured_image).await {
            Ok(verdict) => verdict,
            Err(MatcherError::NoFace(role)) => {
                return Ok(self.fail(epoch, FailureReason::FaceNotDetected(role.to_string())))
            }
            Err(MatcherError::Unavailable(e)) => {
                return Ok(self.fail(epoch, FailureReason::MatcherUnavailable(e)))
            }
            Err(e @ MatcherError::Incomparable { .. }) => {
                return Ok(self.fail(epoch, FailureReason::MatcherUnavailable(e.to_string())))
            }
        };
        if !verdict.is_match {
            return Ok(self.fail(epoch, FailureReason::FaceMismatch { score: verdict.score }));
        }

        let mut outcome = AttendanceOutcome::success(
            &identity,
            self.clock.now(),
            position.coordinate,
            decision.distance_m,
            captured_image,
        );
        if let Some(signer) = &self.signer {
            signer.sign(&mut outcome);
        }

        if let Err(e) = self.store.record(&outcome).await {
            let reason = if e.is_unreachable() {
                FailureReason::BackendUnreachable(e.to_string())
            } else {
                FailureReason::WriteFailed(e.to_string())
            };
            self.fail(epoch, reason);
            return Err(e);
        }

        tracing::info!(
            outcome = %outcome.id,
            identity = %outcome.identity_id,
            distance_m = outcome.measured_distance_m,
            score = verdict.score,
            "attendance recorded"
        );
        let state = CheckInState::Success(outcome);
        self.advance(epoch, state.clone());
        Ok(RunReport::Finished(state))
    }
}
