//! Incident dispatcher.
//!
//! The dispatcher owns the moment an anomaly becomes a confirmed incident:
//! it flips the session to Alerted (exactly once per session), fans the
//! alert out to local subscribers, and reports it to the external
//! incident-management service. External delivery never gates local
//! alerting; failed deliveries land in a bounded store-and-forward queue
//! that a background worker drains when the endpoint recovers.

mod sink;

pub use sink::{DeliveryError, HttpIncidentSink, IncidentSink};

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use geo::Point;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::GuardianConfig;
use crate::domain::authority::AuthorityIndex;
use crate::domain::incident::{IncidentKind, IncidentRecord};
use crate::domain::notifications::Notification;
use crate::domain::session::{Session, SessionId, SubjectDetails};
use crate::registry::SessionStore;

/// Fires confirmed incidents and guarantees their eventual external
/// delivery.
///
/// Cheap to clone; clones share the retry queue and worker.
#[derive(Clone)]
pub struct IncidentDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: GuardianConfig,
    store: Arc<dyn SessionStore>,
    authorities: Arc<AuthorityIndex>,
    sink: Arc<dyn IncidentSink>,
    notifier: broadcast::Sender<Notification>,
    /// Undelivered records, oldest first.
    queue: Mutex<VecDeque<IncidentRecord>>,
    /// Whether a retry worker task is currently live. The worker is spawned
    /// lazily on the first failed delivery and parks itself when the queue
    /// drains.
    worker_active: AtomicBool,
    /// Generation counter shared with the engine, used when synthesizing
    /// transient sessions.
    generations: Arc<AtomicU64>,
}

impl IncidentDispatcher {
    /// Create a dispatcher over shared engine state.
    pub fn new(
        config: GuardianConfig,
        store: Arc<dyn SessionStore>,
        authorities: Arc<AuthorityIndex>,
        sink: Arc<dyn IncidentSink>,
        notifier: broadcast::Sender<Notification>,
        generations: Arc<AtomicU64>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                config,
                store,
                authorities,
                sink,
                notifier,
                queue: Mutex::new(VecDeque::new()),
                worker_active: AtomicBool::new(false),
                generations,
            }),
        }
    }

    /// Fire a confirmed incident for `session_id`.
    ///
    /// If the session is unknown (device-originated distress with no active
    /// ride), a transient session is synthesized first so the incident has a
    /// subject and a jurisdiction. Returns `false` when the session had
    /// already alerted; the duplicate trigger is suppressed entirely and no
    /// record is produced.
    ///
    /// Must be called from within a Tokio runtime: external delivery runs on
    /// a spawned task so this method never blocks on the network.
    pub fn trigger_alert(
        &self,
        session_id: &SessionId,
        kind: IncidentKind,
        location: Option<Point<f64>>,
    ) -> bool {
        if self.inner.store.get(session_id).is_none() {
            let transient = self.transient_session(session_id, location);
            if self.inner.store.insert_if_absent(transient) {
                info!(
                    session = %session_id,
                    kind = %kind,
                    "synthesized transient session for unregistered distress signal"
                );
            }
        }

        // Flip to Alerted under the store lock. Losing the flip means a
        // concurrent trigger already fired for this session.
        let mut tripped = None;
        self.inner.store.update(session_id, &mut |session| {
            if session.trip_alert() {
                tripped = Some(session.clone());
            }
        });
        let session = match tripped {
            Some(session) => session,
            None => {
                debug!(
                    session = %session_id,
                    kind = %kind,
                    "duplicate incident trigger suppressed"
                );
                return false;
            }
        };

        let location = location.unwrap_or_else(|| session.last_location());
        let jurisdiction = self
            .inner
            .authorities
            .get(session.authority())
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| session.authority().to_string());
        let record = IncidentRecord::new(&session, kind, jurisdiction, location);

        info!(
            session = %session_id,
            kind = %kind,
            jurisdiction = %record.jurisdiction,
            lat = record.lat,
            lng = record.lng,
            "incident alert fired"
        );

        // Local subscribers hear about the incident before any network
        // delivery is attempted.
        self.notify(Notification::IncidentAlert {
            session_id: record.session_id.clone(),
            kind: record.kind,
            message: record.message.clone(),
            subject: record.subject.clone(),
            lat: record.lat,
            lng: record.lng,
            dispatch_link: record.dispatch_link.clone(),
            jurisdiction: record.jurisdiction.clone(),
            timestamp: Utc::now(),
        });

        self.spawn_delivery(record);
        true
    }

    /// Number of records awaiting redelivery.
    pub fn pending_retries(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Whether a retry worker is currently live.
    pub fn retry_worker_active(&self) -> bool {
        self.inner.worker_active.load(Ordering::Acquire)
    }

    fn transient_session(&self, id: &SessionId, location: Option<Point<f64>>) -> Session {
        let authority = match location {
            Some(point) => self.inner.authorities.nearest(point),
            None => self.inner.authorities.default_authority(),
        };
        let anchor = location.unwrap_or_else(|| authority.location());
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        Session::new(
            id.clone(),
            generation,
            SubjectDetails::placeholder(id),
            Vec::new(),
            authority.id().clone(),
            anchor,
        )
    }

    fn notify(&self, notification: Notification) {
        if self.inner.notifier.send(notification).is_err() {
            debug!("no notification subscribers connected");
        }
    }

    fn spawn_delivery(&self, record: IncidentRecord) {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            match dispatcher.inner.sink.deliver(&record).await {
                Ok(()) => {
                    debug!(
                        record = %record.record_id,
                        sink = dispatcher.inner.sink.name(),
                        "incident record delivered"
                    );
                }
                Err(err) => {
                    warn!(
                        record = %record.record_id,
                        error = %err,
                        "incident delivery failed, queueing for retry"
                    );
                    dispatcher.enqueue(record);
                }
            }
        });
    }

    /// Queue a record for redelivery and make sure a worker is draining.
    ///
    /// At capacity the oldest record is dropped; losing the newest would
    /// discard the incident that just happened.
    fn enqueue(&self, record: IncidentRecord) {
        {
            let mut queue = self.inner.queue.lock();
            if queue.len() >= self.inner.config.retry_queue_capacity {
                if let Some(dropped) = queue.pop_front() {
                    warn!(
                        record = %dropped.record_id,
                        session = %dropped.session_id,
                        capacity = self.inner.config.retry_queue_capacity,
                        "retry queue full, dropping oldest record"
                    );
                }
            }
            queue.push_back(record);
        }
        self.ensure_worker();
    }

    fn ensure_worker(&self) {
        if !self.inner.worker_active.swap(true, Ordering::AcqRel) {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.retry_loop().await;
            });
        }
    }

    /// Drain the retry queue, waiting `retry_interval` between delivery
    /// cycles. Exits once the queue is empty, handing the active flag back
    /// so the next failure can respawn a worker.
    async fn retry_loop(self) {
        loop {
            tokio::time::sleep(self.inner.config.retry_interval).await;
            self.drain_cycle().await;

            if self.inner.queue.lock().is_empty() {
                self.inner.worker_active.store(false, Ordering::Release);
                // A record may have been queued between the emptiness check
                // and the flag release, with that enqueue losing the spawn
                // race. Re-check and reclaim the flag so it is not stranded.
                if !self.inner.queue.lock().is_empty()
                    && !self.inner.worker_active.swap(true, Ordering::AcqRel)
                {
                    continue;
                }
                return;
            }
        }
    }

    /// One front-to-back delivery pass. Stops at the first failure; the
    /// endpoint is evidently still down and the remaining records keep
    /// their order for the next cycle.
    async fn drain_cycle(&self) {
        loop {
            let head = self.inner.queue.lock().front().cloned();
            let record = match head {
                Some(record) => record,
                None => return,
            };

            match self.inner.sink.deliver(&record).await {
                Ok(()) => {
                    info!(
                        record = %record.record_id,
                        session = %record.session_id,
                        "queued incident record delivered"
                    );
                    self.inner.queue.lock().pop_front();
                }
                Err(err) => {
                    warn!(
                        record = %record.record_id,
                        pending = self.pending_retries(),
                        error = %err,
                        "retry delivery failed, will retry next cycle"
                    );
                    return;
                }
            }
        }
    }
}
