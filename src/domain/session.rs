//! The monitored session aggregate.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};

use super::authority::AuthorityId;

/// Identifier for a monitored session.
///
/// Session ids come from the booking/transport layer (e.g. a ride id) and
/// are opaque strings here. Device-originated distress with no active ride
/// reuses the subject id as the session id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Overall alert status of a session. Monotonic: Monitoring → Alerted
/// happens at most once and Alerted is terminal for the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Under active monitoring; no confirmed incident.
    Monitoring,
    /// A confirmed incident fired for this session. Terminal.
    Alerted,
}

/// Anomaly-verification sub-state, independent of overall [`SessionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscalationStage {
    /// No open verification.
    Normal,
    /// A safety check was sent to the subject; awaiting their response.
    PendingResponse,
    /// Subject confirmed they are safe; anomalies ignored until cooldown
    /// returns the stage to Normal.
    UserSaidSafe,
    /// Subject confirmed danger; the next anomaly signal (or the response
    /// itself) escalates to the dispatcher.
    VerifiedUnsafe,
}

/// Identity and contact details for the monitored subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectDetails {
    /// Display identity of the subject.
    pub display_name: String,
    /// Vehicle reference, if the session is a ride.
    pub vehicle: Option<String>,
    /// Contact reference (phone or similar).
    pub contact: Option<String>,
    /// Free-form note carried through to incident records.
    pub note: Option<String>,
}

impl SubjectDetails {
    /// Create details with just a display identity.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            vehicle: None,
            contact: None,
            note: None,
        }
    }

    /// Set the vehicle reference.
    pub fn with_vehicle(mut self, vehicle: impl Into<String>) -> Self {
        self.vehicle = Some(vehicle.into());
        self
    }

    /// Set the contact reference.
    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contact = Some(contact.into());
        self
    }

    /// Set the free-form note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Placeholder identity for a transient session synthesized from a
    /// device-originated distress signal with no active ride.
    pub fn placeholder(subject_id: &SessionId) -> Self {
        Self::new(format!("Unregistered subject {subject_id}"))
            .with_note("transient distress session")
    }
}

/// One entry in a session's location history.
#[derive(Debug, Clone)]
pub struct TrackPoint {
    /// Reported location (x = lng, y = lat).
    pub location: Point<f64>,
    /// Timestamp carried on the update (arrival metadata, not an ordering
    /// key — history stays in arrival order).
    pub recorded_at: DateTime<Utc>,
}

/// One monitored journey or subject.
///
/// Mutated only through the session store's update path, which serializes
/// all per-session transitions.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    /// Generation tag for timer callbacks. A timer minted against an older
    /// generation must treat its firing as a no-op.
    generation: u64,
    details: SubjectDetails,
    planned_path: Vec<Point<f64>>,
    authority: AuthorityId,
    status: SessionStatus,
    stage: EscalationStage,
    last_location: Point<f64>,
    last_update: DateTime<Utc>,
    history: Vec<TrackPoint>,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Create a new monitoring session.
    ///
    /// `first_waypoint` seeds both the last-known location and the history.
    pub fn new(
        id: SessionId,
        generation: u64,
        details: SubjectDetails,
        planned_path: Vec<Point<f64>>,
        authority: AuthorityId,
        first_waypoint: Point<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            generation,
            details,
            planned_path,
            authority,
            status: SessionStatus::Monitoring,
            stage: EscalationStage::Normal,
            last_location: first_waypoint,
            last_update: now,
            history: vec![TrackPoint {
                location: first_waypoint,
                recorded_at: now,
            }],
            started_at: now,
        }
    }

    /// Get the session id.
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Get the generation tag.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Get the subject details.
    pub fn details(&self) -> &SubjectDetails {
        &self.details
    }

    /// Get the planned waypoints.
    pub fn planned_path(&self) -> &[Point<f64>] {
        &self.planned_path
    }

    /// Get the currently assigned authority.
    pub fn authority(&self) -> &AuthorityId {
        &self.authority
    }

    /// Reassign the monitoring authority (handover).
    pub fn assign_authority(&mut self, authority: AuthorityId) {
        self.authority = authority;
    }

    /// Get the overall status.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Get the escalation stage.
    pub fn stage(&self) -> EscalationStage {
        self.stage
    }

    /// Set the escalation stage.
    pub fn set_stage(&mut self, stage: EscalationStage) {
        self.stage = stage;
    }

    /// Get the last known location.
    pub fn last_location(&self) -> Point<f64> {
        self.last_location
    }

    /// Get the last-update timestamp.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.last_update
    }

    /// Get when monitoring started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the location history (append-only, arrival order).
    pub fn history(&self) -> &[TrackPoint] {
        &self.history
    }

    /// Append a location update to the history and refresh the last-known
    /// location and timestamp. History keeps arrival order even when the
    /// carried timestamps arrive out of order.
    pub fn record_point(&mut self, location: Point<f64>, recorded_at: DateTime<Utc>) {
        self.history.push(TrackPoint {
            location,
            recorded_at,
        });
        self.last_location = location;
        self.last_update = Utc::now();
    }

    /// Refresh the liveness timestamp without recording movement. A
    /// discarded jitter update still proves the location feed is alive.
    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }

    /// Flip the session to Alerted. Returns `false` if it already was — the
    /// caller must treat that as "someone else fired the alert" and stop.
    pub fn trip_alert(&mut self) -> bool {
        if self.status == SessionStatus::Alerted {
            return false;
        }
        self.status = SessionStatus::Alerted;
        true
    }

    /// Whether the session is still under active monitoring.
    pub fn is_monitoring(&self) -> bool {
        self.status == SessionStatus::Monitoring
    }
}
