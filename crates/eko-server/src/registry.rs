use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use eko_shared::Id;
use thiserror::Error;

use crate::metrics;
use crate::session::Session;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {conn_id} is already registered for user {user_id}")]
    Duplicate { user_id: Id, conn_id: u64 },
}

/// Concurrent user id → live sessions table.
///
/// A user may be connected from several devices at once; each connection
/// is one entry under the user's id, keyed by connection id.
#[derive(Debug, Default)]
pub struct Registry {
    users: DashMap<Id, HashMap<u64, Arc<Session>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        let mut entry = self.users.entry(session.user_id).or_default();
        if entry.contains_key(&session.conn_id) {
            return Err(RegistryError::Duplicate {
                user_id: session.user_id,
                conn_id: session.conn_id,
            });
        }
        entry.insert(session.conn_id, session);
        drop(entry);
        self.record_gauges();
        Ok(())
    }

    /// Unregister a session. Returns `false` if it was not registered.
    pub fn remove(&self, session: &Session) -> bool {
        let removed = match self.users.get_mut(&session.user_id) {
            Some(mut sessions) => sessions.remove(&session.conn_id).is_some(),
            None => false,
        };
        // Drop the user's slot once the last session is gone, unless a new
        // one slipped in between.
        self.users
            .remove_if(&session.user_id, |_, sessions| sessions.is_empty());
        if removed {
            self.record_gauges();
        }
        removed
    }

    /// Cancel and unregister a session that can no longer be written to.
    pub fn evict(&self, session: &Session, reason: &'static str) {
        session.close();
        if self.remove(session) {
            tracing::warn!(
                user_id = %session.user_id,
                conn_id = session.conn_id,
                reason,
                "Evicted session"
            );
            metrics::counters::evictions_total(reason);
        }
    }

    /// Snapshot of a user's sessions.
    #[must_use]
    pub fn sessions_of(&self, user_id: Id) -> Vec<Arc<Session>> {
        self.users
            .get(&user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Sessions of `members` that are subscribed to `network_id`.
    #[must_use]
    pub fn sessions_for_network(&self, network_id: Id, members: &[Id]) -> Vec<Arc<Session>> {
        members
            .iter()
            .flat_map(|user_id| self.sessions_of(*user_id))
            .filter(|session| session.is_subscribed(network_id))
            .collect()
    }

    pub fn subscribe_user(&self, user_id: Id, network_id: Id) {
        for session in self.sessions_of(user_id) {
            session.subscribe(network_id);
        }
    }

    pub fn unsubscribe_user(&self, user_id: Id, network_id: Id) {
        for session in self.sessions_of(user_id) {
            session.unsubscribe(network_id);
        }
    }

    /// Cancel every session of a user. Connection tasks unregister them.
    pub fn close_user(&self, user_id: Id) -> usize {
        let sessions = self.sessions_of(user_id);
        for session in &sessions {
            session.close();
        }
        sessions.len()
    }

    pub fn close_all(&self) {
        for entry in self.users.iter() {
            for session in entry.value().values() {
                session.close();
            }
        }
    }

    #[must_use]
    pub fn is_online(&self, user_id: Id) -> bool {
        self.users.contains_key(&user_id)
    }

    #[must_use]
    pub fn online_users(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.users.iter().map(|entry| entry.value().len()).sum()
    }

    fn record_gauges(&self) {
        metrics::gauges::users_online(self.online_users());
        metrics::gauges::sessions_active(self.session_count());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::test_session;

    #[test]
    fn test_add_and_lookup() {
        let registry = Registry::new();
        let (phone, _rx1) = test_session(1, Id(10));
        let (laptop, _rx2) = test_session(2, Id(10));

        registry.add(phone.clone()).unwrap();
        registry.add(laptop).unwrap();

        assert_eq!(registry.sessions_of(Id(10)).len(), 2);
        assert_eq!(registry.online_users(), 1);
        assert_eq!(registry.session_count(), 2);
        assert!(registry.sessions_of(Id(11)).is_empty());

        assert_eq!(
            registry.add(phone),
            Err(RegistryError::Duplicate {
                user_id: Id(10),
                conn_id: 1
            })
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = Registry::new();
        let (session, _rx) = test_session(1, Id(10));
        registry.add(session.clone()).unwrap();

        assert!(registry.remove(&session));
        assert!(!registry.remove(&session));
        assert!(!registry.is_online(Id(10)));
        assert_eq!(registry.online_users(), 0);
    }

    #[test]
    fn test_network_sessions_require_subscription() {
        let registry = Registry::new();
        let (a, _rx1) = test_session(1, Id(10));
        let (b, _rx2) = test_session(2, Id(11));
        let (c, _rx3) = test_session(3, Id(12));
        for s in [&a, &b, &c] {
            registry.add(s.clone()).unwrap();
        }

        registry.subscribe_user(Id(10), Id(99));
        registry.subscribe_user(Id(11), Id(99));

        let members = [Id(10), Id(11), Id(12)];
        let targets = registry.sessions_for_network(Id(99), &members);
        assert_eq!(targets.len(), 2);

        registry.unsubscribe_user(Id(11), Id(99));
        let targets = registry.sessions_for_network(Id(99), &members);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].user_id, Id(10));
    }

    #[test]
    fn test_evict_closes_and_removes() {
        let registry = Registry::new();
        let (session, _rx) = test_session(1, Id(10));
        registry.add(session.clone()).unwrap();

        registry.evict(&session, "slow_consumer");
        assert!(session.is_closed());
        assert!(registry.sessions_of(Id(10)).is_empty());

        // Second eviction of the same session is a no-op.
        registry.evict(&session, "slow_consumer");
    }

    #[test]
    fn test_close_user_cancels_all_devices() {
        let registry = Registry::new();
        let (a, _rx1) = test_session(1, Id(10));
        let (b, _rx2) = test_session(2, Id(10));
        registry.add(a.clone()).unwrap();
        registry.add(b.clone()).unwrap();

        assert_eq!(registry.close_user(Id(10)), 2);
        assert!(a.is_closed() && b.is_closed());
    }
}
