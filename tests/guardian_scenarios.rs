//! End-to-end scenarios through the public engine surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geo::Point;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use ride_guardian::{
    AuthorityIndex, DeliveryError, DeviceEventKind, EscalationStage, GuardianConfig,
    GuardianEngine, IncidentKind, IncidentRecord, IncidentSink, Notification, ResponseOutcome,
    SessionStatus, SubjectDetails, UpdateOutcome,
};

/// Sink that records deliveries and can simulate an outage.
struct TestSink {
    failures_remaining: Mutex<usize>,
    delivered: Mutex<Vec<IncidentRecord>>,
}

impl TestSink {
    fn reliable() -> Arc<Self> {
        Self::failing(0)
    }

    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures_remaining: Mutex::new(failures),
            delivered: Mutex::new(Vec::new()),
        })
    }

    fn delivered(&self) -> Vec<IncidentRecord> {
        self.delivered.lock().clone()
    }
}

#[async_trait]
impl IncidentSink for TestSink {
    fn name(&self) -> &str {
        "test"
    }

    async fn deliver(&self, record: &IncidentRecord) -> Result<(), DeliveryError> {
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(DeliveryError::Unavailable("simulated outage".into()));
        }
        self.delivered.lock().push(record.clone());
        Ok(())
    }
}

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ride_guardian=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn engine_with(sink: Arc<TestSink>, config: GuardianConfig) -> GuardianEngine {
    init_tracing();
    GuardianEngine::with_sink(config, AuthorityIndex::patiala_seed().unwrap(), sink)
}

fn drain(events: &mut broadcast::Receiver<Notification>) -> Vec<Notification> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

fn count_of(notifications: &[Notification], event_type: &str) -> usize {
    notifications
        .iter()
        .filter(|n| n.event_type() == event_type)
        .count()
}

#[tokio::test]
async fn user_confirmed_threat_end_to_end() {
    let sink = TestSink::reliable();
    let engine = engine_with(sink.clone(), GuardianConfig::default());
    let mut events = engine.subscribe();

    engine
        .start_session(
            "S1".into(),
            SubjectDetails::new("Ananya Sharma").with_vehicle("PB-11-A-1101"),
            vec![Point::new(76.36, 30.35)],
        )
        .unwrap();

    // ~200 m east of the pickup, flagged as a route deviation.
    let outcome = engine.on_location_update(&"S1".into(), 30.35, 76.3621, true);
    assert_eq!(outcome, UpdateOutcome::SafetyCheckSent);
    let session = engine.store().get(&"S1".into()).unwrap();
    assert_eq!(session.stage(), EscalationStage::PendingResponse);

    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "safety_check_request"), 1);

    // Subject confirms danger.
    let outcome = engine.on_safety_response(&"S1".into(), false);
    assert_eq!(outcome, ResponseOutcome::Escalated);

    let session = engine.store().get(&"S1".into()).unwrap();
    assert_eq!(session.stage(), EscalationStage::VerifiedUnsafe);
    assert_eq!(session.status(), SessionStatus::Alerted);

    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "incident_alert"), 1);
    let alert = notifications
        .iter()
        .find(|n| n.event_type() == "incident_alert")
        .unwrap();
    match alert {
        Notification::IncidentAlert {
            kind,
            dispatch_link,
            ..
        } => {
            assert_eq!(*kind, IncidentKind::UserConfirmedThreat);
            // Link points at the last reported coordinates.
            assert!(dispatch_link.contains("destination=30.35,76.3621"));
        }
        other => panic!("unexpected notification: {}", other.event_type()),
    }

    // A second anomaly update produces no further alert.
    engine.on_location_update(&"S1".into(), 30.35, 76.3650, true);
    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "incident_alert"), 0);

    tokio::task::yield_now().await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, IncidentKind::UserConfirmedThreat);
    assert_eq!(delivered[0].subject.vehicle.as_deref(), Some("PB-11-A-1101"));
}

#[tokio::test]
async fn device_distress_for_unknown_subject_creates_transient_session() {
    let sink = TestSink::reliable();
    let engine = engine_with(sink.clone(), GuardianConfig::default());
    let mut events = engine.subscribe();

    let fired = engine.device_event(
        &"U1".into(),
        DeviceEventKind::BiometricSos,
        Point::new(76.38, 30.34),
    );
    assert!(fired);

    let session = engine.store().get(&"U1".into()).unwrap();
    assert_eq!(session.status(), SessionStatus::Alerted);

    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "incident_alert"), 1);

    tokio::task::yield_now().await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, IncidentKind::BiometricSos);
    // Jurisdiction resolved to the station nearest the device location.
    let nearest = AuthorityIndex::patiala_seed()
        .unwrap()
        .nearest(Point::new(76.38, 30.34))
        .name()
        .to_string();
    assert_eq!(delivered[0].jurisdiction, nearest);
}

#[tokio::test]
async fn jitter_updates_never_mutate_history_or_authority() {
    let engine = engine_with(TestSink::reliable(), GuardianConfig::default());
    engine
        .start_session(
            "ride_j".into(),
            SubjectDetails::new("Rider"),
            vec![Point::new(76.3860, 30.3400)],
        )
        .unwrap();
    let before = engine.store().get(&"ride_j".into()).unwrap();

    // A burst of sub-threshold wobble around the pickup point.
    for i in 0..20 {
        let wobble = (i % 3) as f64 * 0.000_005;
        let outcome =
            engine.on_location_update(&"ride_j".into(), 30.3400 + wobble, 76.3860, false);
        assert_eq!(outcome, UpdateOutcome::Jitter);
    }

    let after = engine.store().get(&"ride_j".into()).unwrap();
    assert_eq!(after.history().len(), before.history().len());
    assert_eq!(after.authority(), before.authority());
}

#[tokio::test(start_paused = true)]
async fn local_alert_immediate_while_delivery_retries() {
    let config = GuardianConfig::builder()
        .retry_interval(Duration::from_millis(100))
        .build();
    // Initial attempt plus one retry cycle fail.
    let sink = TestSink::failing(2);
    let engine = engine_with(sink.clone(), config);
    let mut events = engine.subscribe();

    engine
        .start_session(
            "ride_r".into(),
            SubjectDetails::new("Rider"),
            vec![Point::new(76.39, 30.34)],
        )
        .unwrap();
    drain(&mut events);

    assert!(engine.manual_distress(&"ride_r".into(), None));

    // Local alert lands before any delivery attempt resolves.
    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "incident_alert"), 1);

    // Paused time: a short sleep lets the spawned delivery task settle.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(engine.dispatcher().pending_retries(), 1);

    tokio::time::sleep(Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(engine.dispatcher().pending_retries(), 0);
    assert!(!engine.dispatcher().retry_worker_active());
    assert_eq!(sink.delivered().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cooldown_reenables_deviation_detection() {
    let config = GuardianConfig::builder()
        .cooldown(Duration::from_secs(5))
        .build();
    let sink = TestSink::reliable();
    let engine = engine_with(sink.clone(), config);
    let mut events = engine.subscribe();

    engine
        .start_session(
            "ride_c".into(),
            SubjectDetails::new("Rider"),
            vec![Point::new(76.3860, 30.3400)],
        )
        .unwrap();

    // First deviation: checked and cleared by the subject.
    engine.on_location_update(&"ride_c".into(), 30.3420, 76.3900, true);
    engine.on_safety_response(&"ride_c".into(), true);
    tokio::time::sleep(Duration::from_secs(6)).await;
    tokio::task::yield_now().await;
    let session = engine.store().get(&"ride_c".into()).unwrap();
    assert_eq!(session.stage(), EscalationStage::Normal);
    drain(&mut events);

    // A later, independent deviation opens a fresh safety check.
    let outcome = engine.on_location_update(&"ride_c".into(), 30.3460, 76.3950, true);
    assert_eq!(outcome, UpdateOutcome::SafetyCheckSent);
    let notifications = drain(&mut events);
    assert_eq!(count_of(&notifications, "safety_check_request"), 1);
}

#[tokio::test]
async fn heartbeat_flags_silent_session_once() {
    let config = GuardianConfig::builder()
        .signal_loss_timeout(Duration::from_millis(50))
        .build();
    let sink = TestSink::reliable();
    let engine = engine_with(sink.clone(), config);
    let monitor = engine.heartbeat();

    engine
        .start_session(
            "ride_h".into(),
            SubjectDetails::new("Rider"),
            vec![Point::new(76.39, 30.34)],
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(monitor.sweep_once(), 1);
    assert_eq!(monitor.sweep_once(), 0);

    tokio::task::yield_now().await;
    let delivered = sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, IncidentKind::SignalLoss);
}

#[tokio::test]
async fn manual_distress_without_session_uses_default_authority() {
    let sink = TestSink::reliable();
    let engine = engine_with(sink.clone(), GuardianConfig::default());

    assert!(engine.manual_distress(&"walkin_user".into(), None));

    let session = engine.store().get(&"walkin_user".into()).unwrap();
    let default_id = AuthorityIndex::patiala_seed()
        .unwrap()
        .default_authority()
        .id()
        .clone();
    assert_eq!(*session.authority(), default_id);

    tokio::task::yield_now().await;
    assert_eq!(sink.delivered().len(), 1);
}
