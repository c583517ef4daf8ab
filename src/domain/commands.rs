//! Inbound commands from the transport collaborator.

use serde::{Deserialize, Serialize};

use super::incident::IncidentKind;
use super::session::{SessionId, SubjectDetails};

/// A latitude/longitude pair as carried on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatLng {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lng: f64,
}

impl From<LatLng> for geo::Point<f64> {
    fn from(p: LatLng) -> Self {
        geo::Point::new(p.lng, p.lat)
    }
}

impl From<geo::Point<f64>> for LatLng {
    fn from(p: geo::Point<f64>) -> Self {
        Self {
            lat: p.y(),
            lng: p.x(),
        }
    }
}

/// On-device trigger types.
///
/// A closed set: an unrecognized type on the wire fails deserialization at
/// the transport edge and never reaches the engine (the transport logs the
/// diagnostic). Each variant maps 1:1 to an [`IncidentKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceEventKind {
    /// Accelerometer crash detection.
    CrashDetected,
    /// Biometric SOS pulse.
    BiometricSos,
    /// Shake-to-alert gesture.
    ShakeToAlert,
}

impl DeviceEventKind {
    /// The incident kind this device event escalates to.
    pub fn incident_kind(self) -> IncidentKind {
        match self {
            Self::CrashDetected => IncidentKind::CrashDetected,
            Self::BiometricSos => IncidentKind::BiometricSos,
            Self::ShakeToAlert => IncidentKind::ShakeToAlert,
        }
    }
}

/// Inbound engine commands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Start monitoring a new session.
    StartSession {
        /// Session id assigned by the booking layer.
        session_id: SessionId,
        /// Subject identity, vehicle/contact reference.
        details: SubjectDetails,
        /// Planned route waypoints, pickup first.
        planned_path: Vec<LatLng>,
    },
    /// Real-time location update for an active session.
    LocationUpdate {
        /// Target session.
        session_id: SessionId,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lng: f64,
        /// Whether the sender flagged this update as anomalous (route
        /// deviation detected upstream).
        #[serde(default)]
        anomaly: bool,
    },
    /// Manual SOS from the subject's app, with or without an active session.
    ManualDistress {
        /// Session or subject id.
        target: SessionId,
        /// Location, if the app could attach one.
        location: Option<LatLng>,
    },
    /// On-device safety trigger.
    DeviceEvent {
        /// Subject id reported by the device.
        subject_id: SessionId,
        /// Trigger type.
        kind: DeviceEventKind,
        /// Device location at trigger time.
        location: LatLng,
    },
    /// Subject's answer to a safety check.
    SafetyResponse {
        /// Target session.
        session_id: SessionId,
        /// `true` = "I am safe".
        is_safe: bool,
    },
    /// Client subscribing to session-scoped notifications. Acknowledged with
    /// a monitoring-started notification; no other engine-state effect.
    JoinSession {
        /// Target session.
        session_id: SessionId,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_event_kinds_map_exhaustively() {
        assert_eq!(
            DeviceEventKind::CrashDetected.incident_kind(),
            IncidentKind::CrashDetected
        );
        assert_eq!(
            DeviceEventKind::BiometricSos.incident_kind(),
            IncidentKind::BiometricSos
        );
        assert_eq!(
            DeviceEventKind::ShakeToAlert.incident_kind(),
            IncidentKind::ShakeToAlert
        );
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(
            r#"{"command":"location_update","session_id":"ride_1","lat":30.35,"lng":76.36,"anomaly":true}"#,
        )
        .unwrap();
        match cmd {
            Command::LocationUpdate {
                session_id,
                anomaly,
                ..
            } => {
                assert_eq!(session_id.as_str(), "ride_1");
                assert!(anomaly);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_anomaly_flag_defaults_to_false() {
        let cmd: Command = serde_json::from_str(
            r#"{"command":"location_update","session_id":"ride_1","lat":30.35,"lng":76.36}"#,
        )
        .unwrap();
        assert!(matches!(cmd, Command::LocationUpdate { anomaly: false, .. }));
    }

    #[test]
    fn test_unknown_device_event_type_is_rejected() {
        let result = serde_json::from_str::<Command>(
            r#"{"command":"device_event","subject_id":"u1","kind":"TELEPATHY","location":{"lat":30.0,"lng":76.0}}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_device_event_wire_format() {
        let cmd: Command = serde_json::from_str(
            r#"{"command":"device_event","subject_id":"user_samsung_001","kind":"BIOMETRIC_SOS","location":{"lat":30.345,"lng":76.385}}"#,
        )
        .unwrap();
        assert!(matches!(
            cmd,
            Command::DeviceEvent {
                kind: DeviceEventKind::BiometricSos,
                ..
            }
        ));
    }
}
