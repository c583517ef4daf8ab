//! The escalation state machine and command surface.
//!
//! [`GuardianEngine`] is the single entry point for inbound events. Every
//! per-session decision and mutation runs inside one session-store update
//! call, so concurrent events for the same session serialize on the store
//! lock. Timers (escalation timeout, post-"safe" cooldown) are spawned
//! tasks tagged with the session generation they were armed against; a
//! timer firing against a superseded generation is a no-op, which closes
//! the restart hazard where a session is overwritten while timers from its
//! previous life are still pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use geo::Point;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GuardianConfig;
use crate::dispatch::{HttpIncidentSink, IncidentDispatcher, IncidentSink};
use crate::domain::authority::AuthorityIndex;
use crate::domain::commands::{Command, DeviceEventKind};
use crate::domain::incident::IncidentKind;
use crate::domain::location::haversine_m;
use crate::domain::notifications::{Notification, SAFETY_CHECK_MESSAGE};
use crate::domain::session::{EscalationStage, Session, SessionId, SubjectDetails};
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::{InMemorySessionStore, SessionStore};
use crate::{EngineError, Result};

/// What a location update did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Unknown session id; the update was dropped without materializing a
    /// session.
    UnknownSession,
    /// Displacement below the movement threshold with no anomaly flag;
    /// discarded as GPS jitter (liveness timestamp still refreshed).
    Jitter,
    /// Recorded with no anomaly action.
    Recorded,
    /// Recorded, and the session was handed over to a new authority.
    HandedOver,
    /// An anomaly opened a safety check with the subject.
    SafetyCheckSent,
    /// An anomaly on a verified-unsafe session escalated to a
    /// confirmed-deviation incident.
    Escalated,
}

/// What a safety response did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// Subject said safe; the false-alarm cooldown window opened.
    CooldownStarted,
    /// Subject confirmed danger; an incident fired.
    Escalated,
    /// No safety check was pending (or the session already alerted); the
    /// response was dropped.
    Ignored,
}

/// The safety-monitoring engine.
///
/// Cheap to clone; clones share all state. See the crate-level docs for the
/// component layout.
#[derive(Clone)]
pub struct GuardianEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: GuardianConfig,
    store: Arc<dyn SessionStore>,
    authorities: Arc<AuthorityIndex>,
    notifier: broadcast::Sender<Notification>,
    dispatcher: IncidentDispatcher,
    /// Monotonic session-generation source, shared with the dispatcher for
    /// transient-session synthesis.
    generations: Arc<AtomicU64>,
    /// At most one pending timer per session (a session is never awaiting a
    /// safety response and in cooldown at the same time).
    timers: Mutex<HashMap<SessionId, TimerHandle>>,
}

struct TimerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

impl GuardianEngine {
    /// Create an engine delivering incidents over HTTP per the configured
    /// endpoint and API key.
    pub fn new(config: GuardianConfig, authorities: AuthorityIndex) -> Result<Self> {
        let sink = HttpIncidentSink::new(
            config.incident_endpoint.clone(),
            config.api_key.clone(),
            config.delivery_timeout,
        )?;
        Ok(Self::with_sink(config, authorities, Arc::new(sink)))
    }

    /// Create an engine with a custom incident sink.
    pub fn with_sink(
        config: GuardianConfig,
        authorities: AuthorityIndex,
        sink: Arc<dyn IncidentSink>,
    ) -> Self {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let authorities = Arc::new(authorities);
        let (notifier, _) = broadcast::channel(config.notification_capacity);
        let generations = Arc::new(AtomicU64::new(1));
        let dispatcher = IncidentDispatcher::new(
            config.clone(),
            store.clone(),
            authorities.clone(),
            sink,
            notifier.clone(),
            generations.clone(),
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                store,
                authorities,
                notifier,
                dispatcher,
                generations,
                timers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to outbound notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    /// The engine configuration.
    pub fn config(&self) -> &GuardianConfig {
        &self.inner.config
    }

    /// The shared session registry.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// The authority index.
    pub fn authorities(&self) -> &AuthorityIndex {
        &self.inner.authorities
    }

    /// The incident dispatcher.
    pub fn dispatcher(&self) -> &IncidentDispatcher {
        &self.inner.dispatcher
    }

    /// Build the signal-loss monitor over this engine's registry. The
    /// caller decides when to spawn it.
    pub fn heartbeat(&self) -> HeartbeatMonitor {
        HeartbeatMonitor::new(
            self.inner.config.clone(),
            self.inner.store.clone(),
            self.inner.dispatcher.clone(),
        )
    }

    /// Dispatch one inbound command to the matching operation.
    pub fn handle(&self, command: Command) -> Result<()> {
        match command {
            Command::StartSession {
                session_id,
                details,
                planned_path,
            } => self.start_session(
                session_id,
                details,
                planned_path.into_iter().map(Into::into).collect(),
            ),
            Command::LocationUpdate {
                session_id,
                lat,
                lng,
                anomaly,
            } => {
                self.on_location_update(&session_id, lat, lng, anomaly);
                Ok(())
            }
            Command::ManualDistress { target, location } => {
                self.manual_distress(&target, location.map(Into::into));
                Ok(())
            }
            Command::DeviceEvent {
                subject_id,
                kind,
                location,
            } => {
                self.device_event(&subject_id, kind, location.into());
                Ok(())
            }
            Command::SafetyResponse {
                session_id,
                is_safe,
            } => {
                self.on_safety_response(&session_id, is_safe);
                Ok(())
            }
            Command::JoinSession { session_id } => self.join_session(&session_id),
        }
    }

    /// Begin monitoring a session.
    ///
    /// The first waypoint is the pickup point; it seeds the last-known
    /// location and selects the initial authority. Restarting an id
    /// overwrites the previous session and invalidates its pending timers.
    pub fn start_session(
        &self,
        session_id: SessionId,
        details: SubjectDetails,
        planned_path: Vec<Point<f64>>,
    ) -> Result<()> {
        let pickup = *planned_path.first().ok_or_else(|| {
            EngineError::Config("planned path must include at least the pickup point".to_string())
        })?;
        let authority = self.inner.authorities.nearest(pickup);
        let authority_id = authority.id().as_str().to_string();
        let authority_name = authority.name().to_string();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

        let session = Session::new(
            session_id.clone(),
            generation,
            details,
            planned_path,
            authority.id().clone(),
            pickup,
        );
        if self.inner.store.insert(session).is_some() {
            self.cancel_timer(&session_id);
            warn!(session = %session_id, "session restarted, superseding previous state");
        }

        info!(
            session = %session_id,
            authority = %authority_id,
            generation,
            "monitoring started"
        );
        self.notify(Notification::MonitoringStarted {
            session_id,
            authority_id,
            authority_name,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Process a real-time location update.
    ///
    /// Unknown session ids are dropped silently; only the distress paths
    /// materialize sessions on demand.
    pub fn on_location_update(
        &self,
        session_id: &SessionId,
        lat: f64,
        lng: f64,
        anomaly: bool,
    ) -> UpdateOutcome {
        let point = Point::new(lng, lat);
        let mut outcome = UpdateOutcome::Recorded;
        let mut handover: Option<(String, String)> = None;
        let mut open_check: Option<u64> = None;
        let mut escalate = false;

        let known = self.inner.store.update(session_id, &mut |session| {
            if !session.is_monitoring() {
                // Post-alert updates keep the track fresh for responders
                // but trigger no further state changes.
                session.record_point(point, Utc::now());
                outcome = UpdateOutcome::Recorded;
                return;
            }

            let displacement = haversine_m(session.last_location(), point);
            if displacement < self.inner.config.jitter_threshold_m && !anomaly {
                session.touch();
                outcome = UpdateOutcome::Jitter;
                return;
            }
            session.record_point(point, Utc::now());
            outcome = UpdateOutcome::Recorded;

            let nearest = self.inner.authorities.nearest(point);
            if nearest.id() != session.authority() {
                let old_name = self
                    .inner
                    .authorities
                    .get(session.authority())
                    .map(|a| a.name().to_string())
                    .unwrap_or_else(|| session.authority().to_string());
                handover = Some((old_name, nearest.name().to_string()));
                session.assign_authority(nearest.id().clone());
                outcome = UpdateOutcome::HandedOver;
            }

            if anomaly {
                match session.stage() {
                    EscalationStage::Normal => {
                        session.set_stage(EscalationStage::PendingResponse);
                        open_check = Some(session.generation());
                        outcome = UpdateOutcome::SafetyCheckSent;
                    }
                    // A check is already out; the existing timer keeps
                    // running.
                    EscalationStage::PendingResponse => {}
                    // Known false-alarm window.
                    EscalationStage::UserSaidSafe => {}
                    EscalationStage::VerifiedUnsafe => {
                        escalate = true;
                        outcome = UpdateOutcome::Escalated;
                    }
                }
            }
        });
        if !known {
            debug!(session = %session_id, "location update for unknown session dropped");
            return UpdateOutcome::UnknownSession;
        }

        if let Some((old_authority, new_authority)) = handover {
            info!(
                session = %session_id,
                from = %old_authority,
                to = %new_authority,
                "authority handover"
            );
            self.notify(Notification::Handover {
                session_id: session_id.clone(),
                old_authority,
                new_authority,
                timestamp: Utc::now(),
            });
        }
        if let Some(generation) = open_check {
            info!(session = %session_id, "anomaly flagged, requesting safety verification");
            // Armed before the notification goes out: a subscriber may
            // answer the safety check as soon as it hears it.
            self.arm_escalation_timer(session_id.clone(), generation);
            self.notify(Notification::SafetyCheckRequest {
                session_id: session_id.clone(),
                message: SAFETY_CHECK_MESSAGE.to_string(),
                timestamp: Utc::now(),
            });
        }
        if escalate {
            self.fire_incident(session_id, IncidentKind::ConfirmedDeviation, Some(point));
        }
        outcome
    }

    /// Process the subject's answer to a safety check.
    ///
    /// Only meaningful while a check is pending; anything else is dropped.
    pub fn on_safety_response(&self, session_id: &SessionId, is_safe: bool) -> ResponseOutcome {
        let mut action = ResponseOutcome::Ignored;
        let mut cooldown_generation = None;

        self.inner.store.update(session_id, &mut |session| {
            if !session.is_monitoring() || session.stage() != EscalationStage::PendingResponse {
                return;
            }
            if is_safe {
                session.set_stage(EscalationStage::UserSaidSafe);
                cooldown_generation = Some(session.generation());
                action = ResponseOutcome::CooldownStarted;
            } else {
                session.set_stage(EscalationStage::VerifiedUnsafe);
                action = ResponseOutcome::Escalated;
            }
        });

        match action {
            ResponseOutcome::CooldownStarted => {
                info!(session = %session_id, "subject confirmed safe, cooldown started");
                if let Some(generation) = cooldown_generation {
                    // Arming replaces (and aborts) the escalation timer.
                    self.arm_cooldown_timer(session_id.clone(), generation);
                }
            }
            ResponseOutcome::Escalated => {
                self.cancel_timer(session_id);
                self.fire_incident(session_id, IncidentKind::UserConfirmedThreat, None);
            }
            ResponseOutcome::Ignored => {
                debug!(session = %session_id, "safety response with no pending check dropped");
            }
        }
        action
    }

    /// Manual SOS from the subject's app. Works with or without an active
    /// session; fires an incident immediately, no verification step.
    ///
    /// Returns `false` if the session had already alerted.
    pub fn manual_distress(&self, target: &SessionId, location: Option<Point<f64>>) -> bool {
        self.fire_incident(target, IncidentKind::ManualSos, location)
    }

    /// On-device safety trigger (crash, biometric SOS, shake-to-alert).
    /// Fires an incident immediately at the device's location.
    ///
    /// Returns `false` if the session had already alerted.
    pub fn device_event(
        &self,
        subject_id: &SessionId,
        kind: DeviceEventKind,
        location: Point<f64>,
    ) -> bool {
        self.fire_incident(subject_id, kind.incident_kind(), Some(location))
    }

    /// Acknowledge a client subscribing to a session's notifications.
    pub fn join_session(&self, session_id: &SessionId) -> Result<()> {
        let session = self
            .inner
            .store
            .get(session_id)
            .ok_or_else(|| EngineError::UnknownSession(session_id.clone()))?;
        let authority_name = self
            .inner
            .authorities
            .get(session.authority())
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| session.authority().to_string());
        self.notify(Notification::MonitoringStarted {
            session_id: session_id.clone(),
            authority_id: session.authority().as_str().to_string(),
            authority_name,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    fn fire_incident(
        &self,
        session_id: &SessionId,
        kind: IncidentKind,
        location: Option<Point<f64>>,
    ) -> bool {
        let fired = self
            .inner
            .dispatcher
            .trigger_alert(session_id, kind, location);
        if fired {
            // Alerted is terminal; whatever timer was pending is moot.
            self.cancel_timer(session_id);
        }
        fired
    }

    fn notify(&self, notification: Notification) {
        if self.inner.notifier.send(notification).is_err() {
            debug!("no notification subscribers connected");
        }
    }

    fn arm_escalation_timer(&self, session_id: SessionId, generation: u64) {
        let engine = self.clone();
        let id = session_id.clone();
        let delay = self.inner.config.escalation_timeout;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.escalation_expired(&id, generation);
        });
        self.install_timer(session_id, generation, EscalationStage::PendingResponse, task);
    }

    fn arm_cooldown_timer(&self, session_id: SessionId, generation: u64) {
        let engine = self.clone();
        let id = session_id.clone();
        let delay = self.inner.config.cooldown;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            engine.cooldown_expired(&id, generation);
        });
        self.install_timer(session_id, generation, EscalationStage::UserSaidSafe, task);
    }

    fn escalation_expired(&self, session_id: &SessionId, generation: u64) {
        self.clear_timer_entry(session_id, generation);

        let mut due = false;
        self.inner.store.update(session_id, &mut |session| {
            due = session.generation() == generation
                && session.is_monitoring()
                && session.stage() == EscalationStage::PendingResponse;
        });
        if !due {
            debug!(session = %session_id, generation, "stale escalation timer ignored");
            return;
        }

        warn!(session = %session_id, "no safety response within timeout, auto-escalating");
        // The stage stays PendingResponse; the Alerted status is what
        // suppresses further escalation for this session.
        self.fire_incident(session_id, IncidentKind::NoResponseEscalation, None);
    }

    fn cooldown_expired(&self, session_id: &SessionId, generation: u64) {
        self.clear_timer_entry(session_id, generation);

        let mut reset = false;
        self.inner.store.update(session_id, &mut |session| {
            if session.generation() == generation
                && session.is_monitoring()
                && session.stage() == EscalationStage::UserSaidSafe
            {
                session.set_stage(EscalationStage::Normal);
                reset = true;
            }
        });
        if reset {
            debug!(session = %session_id, "cooldown elapsed, anomaly detection re-armed");
        }
    }

    /// Install a timer, aborting any previous one for the session.
    ///
    /// The session state is re-checked under the timer lock before the
    /// install lands: a safety response can arrive between the stage
    /// transition that warranted this timer and the install itself, and a
    /// late install must not displace the timer that response armed.
    /// Lock order is timers then store; no caller touches the timer map
    /// while holding the store lock.
    fn install_timer(
        &self,
        session_id: SessionId,
        generation: u64,
        guard_stage: EscalationStage,
        task: JoinHandle<()>,
    ) {
        let mut timers = self.inner.timers.lock();

        let mut still_armed = false;
        self.inner.store.update(&session_id, &mut |session| {
            still_armed = session.generation() == generation
                && session.is_monitoring()
                && session.stage() == guard_stage;
        });
        if !still_armed {
            debug!(session = %session_id, generation, "timer superseded before install");
            task.abort();
            return;
        }

        if let Some(old) = timers.insert(session_id, TimerHandle { generation, task }) {
            old.task.abort();
        }
    }

    fn cancel_timer(&self, session_id: &SessionId) {
        if let Some(timer) = self.inner.timers.lock().remove(session_id) {
            timer.task.abort();
        }
    }

    /// Drop the timer-map entry, but only if it still belongs to the
    /// generation that fired.
    fn clear_timer_entry(&self, session_id: &SessionId, generation: u64) {
        let mut timers = self.inner.timers.lock();
        if timers
            .get(session_id)
            .is_some_and(|t| t.generation == generation)
        {
            timers.remove(session_id);
        }
    }
}
