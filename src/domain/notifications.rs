//! Outbound notifications fanned out to transport subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::incident::IncidentKind;
use super::session::{SessionId, SubjectDetails};

/// Outbound engine notifications.
///
/// Broadcast to all subscribers; session-scoped routing (rooms) is the
/// transport collaborator's concern — every variant carries its session id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Monitoring began for a session (also the `join_session` ack).
    MonitoringStarted {
        /// Session under monitoring.
        session_id: SessionId,
        /// Assigned authority id.
        authority_id: String,
        /// Assigned authority display name.
        authority_name: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// The session's authority changed as it moved.
    Handover {
        /// Session being handed over.
        session_id: SessionId,
        /// Display name of the releasing authority.
        old_authority: String,
        /// Display name of the accepting authority.
        new_authority: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// The subject is being asked to verify they are safe.
    SafetyCheckRequest {
        /// Session being verified.
        session_id: SessionId,
        /// Prompt text for the subject's device.
        message: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
    /// A confirmed incident. Emitted locally and synchronously before any
    /// external delivery is attempted.
    IncidentAlert {
        /// Session the incident belongs to.
        session_id: SessionId,
        /// Incident type tag.
        kind: IncidentKind,
        /// Human-readable description.
        message: String,
        /// Subject details at trigger time.
        subject: SubjectDetails,
        /// Incident latitude in degrees.
        lat: f64,
        /// Incident longitude in degrees.
        lng: f64,
        /// Map-navigation link for responders.
        dispatch_link: String,
        /// Authority holding jurisdiction.
        jurisdiction: String,
        /// Emission time.
        timestamp: DateTime<Utc>,
    },
}

impl Notification {
    /// Stable event-type name (the serde tag).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MonitoringStarted { .. } => "monitoring_started",
            Self::Handover { .. } => "handover",
            Self::SafetyCheckRequest { .. } => "safety_check_request",
            Self::IncidentAlert { .. } => "incident_alert",
        }
    }

    /// The session this notification concerns.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::MonitoringStarted { session_id, .. } => session_id,
            Self::Handover { session_id, .. } => session_id,
            Self::SafetyCheckRequest { session_id, .. } => session_id,
            Self::IncidentAlert { session_id, .. } => session_id,
        }
    }

    /// Emission timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::MonitoringStarted { timestamp, .. } => *timestamp,
            Self::Handover { timestamp, .. } => *timestamp,
            Self::SafetyCheckRequest { timestamp, .. } => *timestamp,
            Self::IncidentAlert { timestamp, .. } => *timestamp,
        }
    }
}

/// Prompt text sent with a safety check.
pub const SAFETY_CHECK_MESSAGE: &str = "Route deviation detected. Are you safe?";
