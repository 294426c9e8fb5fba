//! Thread-safe mapping from session id to live session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::session::context::Session;

/// Registry that lets a stop request reach an in-flight worker.
///
/// All access goes through one internal mutex. Lookups hand out `Arc`
/// clones, so no caller ever holds a reference into the map itself.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session` under its id, replacing any previous entry.
    pub fn register(&self, session: Arc<Session>) {
        let id = session.id().to_string();
        if self.lock().insert(id.clone(), session).is_some() {
            debug!(session_id = %id, "replaced existing session entry");
        }
        debug!(session_id = %id, "session registered");
    }

    /// Remove `id` if present. Removing an absent id is not an error.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.lock().remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "session removed");
        }
        removed
    }

    /// Remove `id` only while it still maps to `session`.
    ///
    /// A newer session registered under the same id is left in place.
    pub fn remove_if_current(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.lock();
        let current = sessions
            .get(session.id())
            .is_some_and(|entry| Arc::ptr_eq(entry, session));
        if current {
            sessions.remove(session.id());
            debug!(session_id = %session.id(), "session removed");
        } else {
            debug!(session_id = %session.id(), "entry belongs to a newer session, kept");
        }
        current
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.lock().get(id).cloned()
    }

    /// Snapshot of active ids, sorted for stable output.
    pub fn list_active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a session from the registry when dropped.
///
/// Held by the worker for the lifetime of a run so the entry disappears on
/// every exit path, including a panic. Only its own entry is removed, so a
/// session reopened under the same id stays reachable.
pub struct RegistrationGuard {
    registry: Arc<SessionRegistry>,
    session: Arc<Session>,
}

impl RegistrationGuard {
    pub fn register(registry: Arc<SessionRegistry>, session: Arc<Session>) -> Self {
        registry.register(session.clone());
        Self { registry, session }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.remove_if_current(&self.session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingWriter, sample_query};
    use std::collections::BTreeSet;
    use std::thread;

    fn session(id: &str) -> Arc<Session> {
        Arc::new(Session::new(
            id,
            sample_query(),
            4,
            Arc::new(RecordingWriter::new()),
        ))
    }

    #[test]
    fn register_then_get_returns_same_session() {
        let registry = SessionRegistry::new();
        let s = session("a");
        registry.register(s.clone());
        let found = registry.get("a").expect("registered");
        assert!(Arc::ptr_eq(&found, &s));
    }

    #[test]
    fn remove_then_get_is_absent_and_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.register(session("a"));
        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_none());
        assert!(registry.list_active_ids().is_empty());
    }

    #[test]
    fn list_is_a_snapshot() {
        let registry = SessionRegistry::new();
        registry.register(session("b"));
        registry.register(session("a"));
        let ids = registry.list_active_ids();
        registry.remove("a");
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.list_active_ids(), vec!["b".to_string()]);
    }

    #[test]
    fn concurrent_register_and_remove_leave_exact_survivors() {
        let registry = Arc::new(SessionRegistry::new());
        let handles: Vec<_> = (0..100)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let id = format!("s{i}");
                    registry.register(session(&id));
                    if i % 3 == 0 {
                        registry.remove(&id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join worker");
        }

        let expected: BTreeSet<String> = (0..100)
            .filter(|i| i % 3 != 0)
            .map(|i| format!("s{i}"))
            .collect();
        let actual: BTreeSet<String> = registry.list_active_ids().into_iter().collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn guard_removes_entry_on_drop() {
        let registry = Arc::new(SessionRegistry::new());
        {
            let _guard = RegistrationGuard::register(registry.clone(), session("g"));
            assert!(registry.get("g").is_some());
        }
        assert!(registry.get("g").is_none());
    }

    #[test]
    fn stale_guard_leaves_newer_session_registered() {
        let registry = Arc::new(SessionRegistry::new());
        let old = RegistrationGuard::register(registry.clone(), session("dup"));
        let newer = session("dup");
        let current = RegistrationGuard::register(registry.clone(), newer.clone());

        drop(old);
        let found = registry.get("dup").expect("newer session still registered");
        assert!(Arc::ptr_eq(&found, &newer));

        drop(current);
        assert!(registry.list_active_ids().is_empty());
    }
}
