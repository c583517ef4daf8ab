//! Concurrency-safe session registry.
//!
//! The registry is the single shared mutable resource on the inbound path.
//! It sits behind the [`SessionStore`] capability trait so the state machine
//! never depends on the backing store; the default backing is an in-process
//! map. All per-session decision+mutation sequences run inside one
//! [`SessionStore::update`] call, which is the engine's per-session
//! mutual-exclusion point.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::domain::session::{Session, SessionId};

/// Storage capability for monitored sessions.
///
/// Object safe on purpose: the escalation machinery holds this as
/// `Arc<dyn SessionStore>` so a registry backed by an external store can be
/// swapped in without touching the state machine.
pub trait SessionStore: Send + Sync {
    /// Insert a session, replacing any session with the same id.
    ///
    /// Returns the replaced session so the caller can cancel timers that
    /// belong to the superseded generation.
    fn insert(&self, session: Session) -> Option<Session>;

    /// Insert a session only if the id is not already present.
    ///
    /// Returns `false` (leaving the existing session untouched) if the id is
    /// taken. Used for transient distress sessions, where a concurrent
    /// insert must not reset an already-alerted session.
    fn insert_if_absent(&self, session: Session) -> bool;

    /// Snapshot a session by id.
    fn get(&self, id: &SessionId) -> Option<Session>;

    /// Mutate a session in place under the store lock.
    ///
    /// Returns `false` if the id is unknown (the closure did not run). The
    /// closure must not block: it runs while other sessions are locked out.
    fn update(&self, id: &SessionId, f: &mut dyn FnMut(&mut Session)) -> bool;

    /// Remove a session.
    fn remove(&self, id: &SessionId) -> Option<Session>;

    /// Snapshot all sessions, in no particular order.
    fn snapshot(&self) -> Vec<Session>;

    /// Number of live sessions.
    fn len(&self) -> usize;

    /// Whether the registry is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory session registry.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> Option<Session> {
        self.sessions
            .write()
            .insert(session.id().clone(), session)
    }

    fn insert_if_absent(&self, session: Session) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.entry(session.id().clone()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    fn update(&self, id: &SessionId, f: &mut dyn FnMut(&mut Session)) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) => {
                f(session);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: &SessionId) -> Option<Session> {
        self.sessions.write().remove(id)
    }

    fn snapshot(&self) -> Vec<Session> {
        self.sessions.read().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.sessions.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{SessionStatus, SubjectDetails};
    use geo::Point;

    fn session(id: &str, generation: u64) -> Session {
        Session::new(
            id.into(),
            generation,
            SubjectDetails::new("Rider"),
            vec![Point::new(76.36, 30.35)],
            "st_patiala_01".into(),
            Point::new(76.36, 30.35),
        )
    }

    #[test]
    fn test_insert_get_remove() {
        let store = InMemorySessionStore::new();
        assert!(store.is_empty());

        assert!(store.insert(session("ride_1", 1)).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"ride_1".into()).unwrap().generation(), 1);

        assert!(store.remove(&"ride_1".into()).is_some());
        assert!(store.get(&"ride_1".into()).is_none());
    }

    #[test]
    fn test_insert_replaces_and_returns_old_generation() {
        let store = InMemorySessionStore::new();
        store.insert(session("ride_1", 1));

        let replaced = store.insert(session("ride_1", 2)).unwrap();
        assert_eq!(replaced.generation(), 1);
        // Exactly one live session per id.
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"ride_1".into()).unwrap().generation(), 2);
    }

    #[test]
    fn test_insert_if_absent_keeps_existing() {
        let store = InMemorySessionStore::new();
        assert!(store.insert_if_absent(session("ride_1", 1)));
        assert!(!store.insert_if_absent(session("ride_1", 2)));
        assert_eq!(store.get(&"ride_1".into()).unwrap().generation(), 1);
    }

    #[test]
    fn test_update_runs_in_place() {
        let store = InMemorySessionStore::new();
        store.insert(session("ride_1", 1));

        let mut tripped = false;
        let ran = store.update(&"ride_1".into(), &mut |s| {
            tripped = s.trip_alert();
        });
        assert!(ran);
        assert!(tripped);
        assert_eq!(
            store.get(&"ride_1".into()).unwrap().status(),
            SessionStatus::Alerted
        );
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let store = InMemorySessionStore::new();
        let mut ran_closure = false;
        let ran = store.update(&"missing".into(), &mut |_| ran_closure = true);
        assert!(!ran);
        assert!(!ran_closure);
    }

    #[test]
    fn test_snapshot() {
        let store = InMemorySessionStore::new();
        store.insert(session("ride_1", 1));
        store.insert(session("ride_2", 2));
        let mut ids: Vec<_> = store
            .snapshot()
            .into_iter()
            .map(|s| s.id().as_str().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, ["ride_1", "ride_2"]);
    }
}
