//! Confirmed-incident payloads destined for the incident-management service.

use chrono::{DateTime, Utc};
use geo::Point;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::location::dispatch_link;
use super::session::{Session, SessionId, SubjectDetails};

/// Closed set of incident type tags.
///
/// Every trigger path in the engine maps to exactly one of these; device
/// events map through an exhaustive match, never string comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    /// Route deviation, verified unsafe by an earlier user response.
    ConfirmedDeviation,
    /// Subject answered the safety check with "not safe".
    UserConfirmedThreat,
    /// No response to a safety check within the escalation timeout.
    NoResponseEscalation,
    /// Location feed went silent beyond the signal-loss timeout.
    SignalLoss,
    /// Manual SOS trigger from the subject's app.
    ManualSos,
    /// Device accelerometer crash detection.
    CrashDetected,
    /// Device biometric SOS pulse.
    BiometricSos,
    /// Device shake-to-alert gesture.
    ShakeToAlert,
}

impl IncidentKind {
    /// Stable wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfirmedDeviation => "CONFIRMED_DEVIATION",
            Self::UserConfirmedThreat => "USER_CONFIRMED_THREAT",
            Self::NoResponseEscalation => "NO_RESPONSE_ESCALATION",
            Self::SignalLoss => "SIGNAL_LOSS",
            Self::ManualSos => "MANUAL_SOS",
            Self::CrashDetected => "CRASH_DETECTED",
            Self::BiometricSos => "BIOMETRIC_SOS",
            Self::ShakeToAlert => "SHAKE_TO_ALERT",
        }
    }

    /// Human-readable message carried in the record and the local alert.
    pub fn message(&self) -> &'static str {
        match self {
            Self::ConfirmedDeviation => "Route deviation verified by subject",
            Self::UserConfirmedThreat => "Subject confirmed they are NOT safe",
            Self::NoResponseEscalation => "No response to safety check within timeout",
            Self::SignalLoss => "Location feed silent beyond signal-loss timeout",
            Self::ManualSos => "Manual SOS triggered by subject",
            Self::CrashDetected => "Device crash detection triggered",
            Self::BiometricSos => "Device biometric SOS pulse detected",
            Self::ShakeToAlert => "Device shake-to-alert gesture detected",
        }
    }
}

impl std::fmt::Display for IncidentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload describing one confirmed incident.
///
/// Created at the moment an alert fires and owned by the dispatcher until
/// delivered, after which it is discarded. This is the exact POST body for
/// the external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentRecord {
    /// Unique record id.
    pub record_id: Uuid,
    /// Session the incident belongs to.
    pub session_id: SessionId,
    /// Incident type tag.
    pub kind: IncidentKind,
    /// Human-readable description.
    pub message: String,
    /// Subject details copied from the session at trigger time.
    pub subject: SubjectDetails,
    /// Display name of the authority holding jurisdiction.
    pub jurisdiction: String,
    /// Map-navigation link for responders.
    pub dispatch_link: String,
    /// Incident latitude in degrees.
    pub lat: f64,
    /// Incident longitude in degrees.
    pub lng: f64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl IncidentRecord {
    /// Build a record from a session snapshot, resolved jurisdiction name,
    /// and the incident location.
    pub fn new(
        session: &Session,
        kind: IncidentKind,
        jurisdiction: impl Into<String>,
        location: Point<f64>,
    ) -> Self {
        Self {
            record_id: Uuid::new_v4(),
            session_id: session.id().clone(),
            kind,
            message: kind.message().to_string(),
            subject: session.details().clone(),
            jurisdiction: jurisdiction.into(),
            dispatch_link: dispatch_link(location),
            lat: location.y(),
            lng: location.x(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        Session::new(
            "ride_7".into(),
            1,
            SubjectDetails::new("Rider").with_vehicle("PB-11-A-1007"),
            vec![Point::new(76.36, 30.35)],
            "st_patiala_09".into(),
            Point::new(76.36, 30.35),
        )
    }

    #[test]
    fn test_record_carries_location_and_link() {
        let record = IncidentRecord::new(
            &test_session(),
            IncidentKind::UserConfirmedThreat,
            "Women Cell Patiala",
            Point::new(76.3612, 30.3488),
        );

        assert_eq!(record.lat, 30.3488);
        assert_eq!(record.lng, 76.3612);
        assert!(record.dispatch_link.contains("30.3488,76.3612"));
        assert_eq!(record.jurisdiction, "Women Cell Patiala");
        assert_eq!(record.subject.vehicle.as_deref(), Some("PB-11-A-1007"));
    }

    #[test]
    fn test_wire_tags_are_screaming_snake() {
        let json = serde_json::to_string(&IncidentKind::BiometricSos).unwrap();
        assert_eq!(json, "\"BIOMETRIC_SOS\"");
        assert_eq!(IncidentKind::SignalLoss.as_str(), "SIGNAL_LOSS");
    }

    #[test]
    fn test_record_serializes_for_post() {
        let record = IncidentRecord::new(
            &test_session(),
            IncidentKind::SignalLoss,
            "Kotwali Police Station",
            Point::new(76.40, 30.34),
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "SIGNAL_LOSS");
        assert_eq!(value["session_id"], "ride_7");
        assert!(value["dispatch_link"].as_str().unwrap().contains("google.com/maps"));
    }
}
