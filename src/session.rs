//! Live worker sessions and their advertised capacity.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

pub type SessionId = u64;

/// Handshake capacities above this are rejected unless configured otherwise.
pub const DEFAULT_MAX_CAPACITY: u32 = 10_000;

/// One connected worker.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub peer: Option<SocketAddr>,
    pub platform: Option<String>,
    pub version: Option<i64>,
    pub capacity: u32,
    pub handshakes: u32,
    pub connected_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Sessions {
    by_id: HashMap<SessionId, Session>,
    total_capacity: u64,
}

/// Tracks connected sessions and keeps the capacity total in step with them.
#[derive(Debug)]
pub struct SessionManager {
    next_id: AtomicU64,
    max_capacity: u32,
    inner: Mutex<Sessions>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CAPACITY)
    }
}

impl SessionManager {
    pub fn new(max_capacity: u32) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_capacity,
            inner: Mutex::new(Sessions::default()),
        }
    }

    /// Register a new connection with capacity 0.
    pub fn register(&self, peer: Option<SocketAddr>) -> SessionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Session {
            id,
            peer,
            platform: None,
            version: None,
            capacity: 0,
            handshakes: 0,
            connected_at: Utc::now(),
        };
        self.inner.lock().by_id.insert(id, session);
        id
    }

    /// Register and return a guard that unregisters on drop.
    pub fn open(self: &Arc<Self>, peer: Option<SocketAddr>) -> SessionGuard {
        SessionGuard {
            id: self.register(peer),
            manager: Arc::clone(self),
        }
    }

    /// Record handshake identity fields.
    pub fn record_handshake(&self, id: SessionId, platform: Option<String>, version: Option<i64>) {
        if let Some(session) = self.inner.lock().by_id.get_mut(&id) {
            session.handshakes += 1;
            if platform.is_some() {
                session.platform = platform;
            }
            if version.is_some() {
                session.version = version;
            }
        }
    }

    /// Replace the advertised capacity of a session.
    ///
    /// Negative values and values above the configured maximum are rejected
    /// and leave the previous capacity in place. Returns the stored capacity
    /// when accepted.
    pub fn set_capacity(&self, id: SessionId, declared: i64) -> Option<u32> {
        let capacity = u32::try_from(declared)
            .ok()
            .filter(|&c| c <= self.max_capacity)?;

        let mut inner = self.inner.lock();
        let session = inner.by_id.get_mut(&id)?;
        let previous = std::mem::replace(&mut session.capacity, capacity);
        inner.total_capacity = inner.total_capacity - u64::from(previous) + u64::from(capacity);
        Some(capacity)
    }

    /// Drop a session and subtract its capacity.
    pub fn remove(&self, id: SessionId) -> Option<Session> {
        let mut inner = self.inner.lock();
        let session = inner.by_id.remove(&id)?;
        inner.total_capacity -= u64::from(session.capacity);
        Some(session)
    }

    pub fn get(&self, id: SessionId) -> Option<Session> {
        self.inner.lock().by_id.get(&id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn aggregate_capacity(&self) -> u64 {
        self.inner.lock().total_capacity
    }

    /// Copy of all live sessions, ordered by id.
    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.inner.lock().by_id.values().cloned().collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }
}

/// Keeps a session registered for as long as it lives.
#[derive(Debug)]
pub struct SessionGuard {
    id: SessionId,
    manager: Arc<SessionManager>,
}

impl SessionGuard {
    pub const fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.manager.remove(self.id) {
            tracing::info!(
                session = self.id,
                capacity = session.capacity,
                total = self.manager.aggregate_capacity(),
                "worker disconnected"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sessions_start_with_zero_capacity() {
        let manager = SessionManager::default();
        let id = manager.register(None);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(manager.aggregate_capacity(), 0);
        assert_eq!(manager.get(id).unwrap().capacity, 0);
    }

    #[test]
    fn repeated_handshakes_replace_capacity() {
        let manager = SessionManager::default();
        let id = manager.register(None);

        assert_eq!(manager.set_capacity(id, 5), Some(5));
        assert_eq!(manager.set_capacity(id, 3), Some(3));
        assert_eq!(manager.set_capacity(id, -1), None);

        assert_eq!(manager.aggregate_capacity(), 3);
        assert_eq!(manager.get(id).unwrap().capacity, 3);
    }

    #[test]
    fn absurd_capacity_is_rejected() {
        let manager = SessionManager::new(100);
        let id = manager.register(None);
        manager.set_capacity(id, 10);

        assert_eq!(manager.set_capacity(id, 101), None);
        assert_eq!(manager.set_capacity(id, i64::MAX), None);
        assert_eq!(manager.aggregate_capacity(), 10);
    }

    #[test]
    fn removal_subtracts_capacity() {
        let manager = SessionManager::default();
        let a = manager.register(None);
        let b = manager.register(None);
        manager.set_capacity(a, 4);
        manager.set_capacity(b, 6);
        assert_eq!(manager.aggregate_capacity(), 10);

        let removed = manager.remove(a).unwrap();
        assert_eq!(removed.capacity, 4);
        assert_eq!(manager.aggregate_capacity(), 6);
        assert_eq!(manager.connection_count(), 1);
        assert!(manager.remove(a).is_none());
    }

    #[test]
    fn capacity_for_unknown_session_is_ignored() {
        let manager = SessionManager::default();
        assert_eq!(manager.set_capacity(42, 5), None);
        assert_eq!(manager.aggregate_capacity(), 0);
    }

    #[test]
    fn guard_drop_unregisters() {
        let manager = Arc::new(SessionManager::default());
        let guard = manager.open(None);
        manager.set_capacity(guard.id(), 7);
        assert_eq!(manager.aggregate_capacity(), 7);

        drop(guard);
        assert_eq!(manager.connection_count(), 0);
        assert_eq!(manager.aggregate_capacity(), 0);
    }

    #[test]
    fn handshake_fields_are_recorded() {
        let manager = SessionManager::default();
        let id = manager.register(None);
        manager.record_handshake(id, Some("bot-v2".into()), Some(3));
        manager.record_handshake(id, None, None);

        let session = manager.get(id).unwrap();
        assert_eq!(session.platform.as_deref(), Some("bot-v2"));
        assert_eq!(session.version, Some(3));
        assert_eq!(session.handshakes, 2);
    }
}
