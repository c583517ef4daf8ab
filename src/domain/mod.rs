//! Domain types for the safety-monitoring engine.
//!
//! Bounded contexts: geographic primitives ([`location`]), the fixed
//! authority set ([`authority`]), the monitored session aggregate
//! ([`session`]), confirmed-incident payloads ([`incident`]), and the wire
//! enums exchanged with the transport collaborator ([`commands`],
//! [`notifications`]).

pub mod authority;
pub mod commands;
pub mod incident;
pub mod location;
pub mod notifications;
pub mod session;

pub use authority::{Authority, AuthorityId, AuthorityIndex};
pub use commands::{Command, DeviceEventKind};
pub use incident::{IncidentKind, IncidentRecord};
pub use location::{dispatch_link, haversine_km, haversine_m};
pub use notifications::Notification;
pub use session::{
    EscalationStage, Session, SessionId, SessionStatus, SubjectDetails, TrackPoint,
};
