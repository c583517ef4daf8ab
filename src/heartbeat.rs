//! Signal-loss detection.
//!
//! The heartbeat monitor is the liveness side of the engine: it treats
//! prolonged silence from a session's location feed as a safety-relevant
//! event, independent of the anomaly path. It sweeps the registry on a
//! fixed period and routes silent sessions through the dispatcher, whose
//! Alerted guard makes the signal-loss alert fire at most once per session.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GuardianConfig;
use crate::dispatch::IncidentDispatcher;
use crate::domain::incident::IncidentKind;
use crate::registry::SessionStore;

/// Periodic sweep over the registry detecting signal loss.
pub struct HeartbeatMonitor {
    config: GuardianConfig,
    store: Arc<dyn SessionStore>,
    dispatcher: IncidentDispatcher,
}

impl HeartbeatMonitor {
    /// Create a monitor over the shared registry and dispatcher.
    pub fn new(
        config: GuardianConfig,
        store: Arc<dyn SessionStore>,
        dispatcher: IncidentDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
        }
    }

    /// Run the sweep loop until the returned handle is aborted or dropped
    /// by the owner.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.heartbeat_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep_once();
            }
        })
    }

    /// One sweep pass. Returns how many signal-loss alerts fired.
    ///
    /// Alerted sessions are skipped; a session that went silent after its
    /// incident fired is already in responders' hands.
    pub fn sweep_once(&self) -> usize {
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(self.config.signal_loss_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(15));
        let mut fired = 0;

        for session in self.store.snapshot() {
            if !session.is_monitoring() {
                continue;
            }
            let silence = now - session.last_update();
            if silence <= timeout {
                continue;
            }
            warn!(
                session = %session.id(),
                silent_secs = silence.num_seconds(),
                "location feed silent beyond timeout, raising signal loss"
            );
            if self.dispatcher.trigger_alert(
                session.id(),
                IncidentKind::SignalLoss,
                Some(session.last_location()),
            ) {
                fired += 1;
            }
        }

        if fired > 0 {
            debug!(alerts = fired, "heartbeat sweep complete");
        }
        fired
    }
}
