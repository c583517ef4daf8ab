//! # ride-guardian
//!
//! A real-time safety-monitoring engine for active movement sessions — a
//! ride, a walk, or a device-carried subject.
//!
//! The engine tracks each session, assigns it to the geographically nearest
//! of a fixed set of monitoring authorities, detects anomalies (route
//! deviation, signal loss, manual or device-triggered distress), verifies
//! them with the subject before declaring an incident, and reliably reports
//! confirmed incidents to an external incident-management service even when
//! that service is temporarily unreachable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      ride-guardian                       │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌───────────┐  ┌────────────┐  ┌────────────────────┐  │
//! │  │ Authority │  │  Session   │  │     Escalation     │  │
//! │  │   Index   │  │  Registry  │  │   State Machine    │  │
//! │  └─────┬─────┘  └─────┬──────┘  └─────────┬──────────┘  │
//! │        └──────────────┼───────────────────┘             │
//! │                       │                                 │
//! │   ┌───────────┐  ┌────▼──────────────┐                  │
//! │   │ Heartbeat │─▶│     Incident      │──▶ local alert   │
//! │   │  Monitor  │  │    Dispatcher     │──▶ external POST │
//! │   └───────────┘  └───────────────────┘    (+ retry)     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Inbound commands flow through the [`GuardianEngine`]; outbound
//! notifications fan out on a broadcast channel that transport adapters
//! subscribe to. The external-delivery path never blocks local alerting: a
//! confirmed incident is broadcast locally first, and the network report is
//! retried from a bounded store-and-forward queue until the endpoint
//! recovers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ride_guardian::{
//!     AuthorityIndex, GuardianConfig, GuardianEngine, SubjectDetails,
//! };
//! use geo::Point;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ride_guardian::EngineError> {
//!     let config = GuardianConfig::builder()
//!         .incident_endpoint("https://incidents.example.org/api/incidents")
//!         .api_key("knox-demo-key")
//!         .build();
//!
//!     let engine = GuardianEngine::new(config, AuthorityIndex::patiala_seed()?)?;
//!     let _heartbeat = engine.heartbeat().spawn();
//!     let mut events = engine.subscribe();
//!
//!     let details = SubjectDetails::new("Ananya Sharma")
//!         .with_vehicle("PB-11-A-1101")
//!         .with_contact("+91-98765-43210");
//!     engine.start_session(
//!         "ride_001".into(),
//!         details,
//!         vec![Point::new(76.36, 30.35), Point::new(76.39, 30.34)],
//!     )?;
//!
//!     while let Ok(notification) = events.recv().await {
//!         println!("{}", notification.event_type());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod engine;
pub mod heartbeat;
pub mod registry;

pub use config::{GuardianConfig, GuardianConfigBuilder};
pub use dispatch::{DeliveryError, HttpIncidentSink, IncidentDispatcher, IncidentSink};
pub use domain::{
    authority::{Authority, AuthorityId, AuthorityIndex},
    commands::{Command, DeviceEventKind},
    incident::{IncidentKind, IncidentRecord},
    location::{dispatch_link, haversine_km, haversine_m},
    notifications::Notification,
    session::{EscalationStage, Session, SessionId, SessionStatus, SubjectDetails, TrackPoint},
};
pub use engine::{GuardianEngine, ResponseOutcome, UpdateOutcome};
pub use heartbeat::HeartbeatMonitor;
pub use registry::{InMemorySessionStore, SessionStore};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The authority index was constructed with no entries.
    #[error("authority index is empty")]
    NoAuthorities,

    /// A session id was required but not found.
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// External delivery failure. Surfaced only from the sink boundary; the
    /// dispatcher itself absorbs these into the retry queue.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{
        Authority, AuthorityId, AuthorityIndex, Command, DeviceEventKind, EngineError,
        EscalationStage, GuardianConfig, GuardianEngine, HeartbeatMonitor, IncidentDispatcher,
        IncidentKind, IncidentRecord, IncidentSink, Notification, Result, Session, SessionId,
        SessionStatus, SessionStore, SubjectDetails,
    };
}
