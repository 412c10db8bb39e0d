use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;
use stdiogate_core::JsonRpcId;

use super::{CorrelationKey, SessionId};
use crate::error::RegistryError;

/// One in-flight request forwarded to the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub session_id: SessionId,
    /// The id the client used; restored on the response.
    pub client_id: JsonRpcId,
    pub method: String,
    pub sent_at: Instant,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub created_at: SystemTime,
    pub pending_ids: Vec<JsonRpcId>,
    pub stream_attached: bool,
    pub alive: bool,
}

struct SessionState {
    created_at: SystemTime,
    /// Last open, request or notification from the client.
    last_activity: Instant,
    stream_attached: bool,
    /// Client id → correlation key for requests still pending.
    pending: HashMap<JsonRpcId, CorrelationKey>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionState>,
    pending: HashMap<CorrelationKey, PendingEntry>,
}

impl Inner {
    fn take_pending(&mut self, key: CorrelationKey) -> Option<PendingEntry> {
        let entry = self.pending.remove(&key)?;
        if let Some(session) = self.sessions.get_mut(&entry.session_id) {
            session.pending.remove(&entry.client_id);
        }
        Some(entry)
    }
}

/// Sessions and the pending-request table, behind one lock.
///
/// The lock is never held across an `.await`; every operation is a short
/// critical section. A session is alive exactly while it is present here.
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    next_key: AtomicU64,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_key: AtomicU64::new(1),
            max_sessions,
        }
    }

    /// Allocate a new session.
    pub fn open(&self) -> Result<SessionId, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.sessions.len() >= self.max_sessions {
            return Err(RegistryError::SessionLimitReached {
                max_sessions: self.max_sessions,
            });
        }
        let id = SessionId::new();
        inner.sessions.insert(
            id,
            SessionState {
                created_at: SystemTime::now(),
                last_activity: Instant::now(),
                stream_attached: false,
                pending: HashMap::new(),
            },
        );
        Ok(id)
    }

    /// Remove a session and hand back its abandoned requests.
    ///
    /// Returns `None` for unknown or already-closed sessions.
    pub fn close(&self, id: &SessionId) -> Option<Vec<(CorrelationKey, PendingEntry)>> {
        let mut inner = self.inner.lock();
        let session = inner.sessions.remove(id)?;
        let abandoned = session
            .pending
            .into_values()
            .filter_map(|key| inner.pending.remove(&key).map(|entry| (key, entry)))
            .collect();
        Some(abandoned)
    }

    /// Allocate a correlation key for `client_id` within `session_id`.
    pub fn register(
        &self,
        session_id: &SessionId,
        client_id: JsonRpcId,
        method: &str,
    ) -> Result<CorrelationKey, RegistryError> {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.get_mut(session_id) else {
            return Err(RegistryError::SessionClosed {
                session_id: session_id.to_string(),
            });
        };
        if session.pending.contains_key(&client_id) {
            return Err(RegistryError::DuplicateId {
                session_id: session_id.to_string(),
                client_id: client_id.to_string(),
            });
        }

        let key = CorrelationKey::new(self.next_key.fetch_add(1, Ordering::Relaxed));
        session.last_activity = Instant::now();
        session.pending.insert(client_id.clone(), key);
        inner.pending.insert(
            key,
            PendingEntry {
                session_id: *session_id,
                client_id,
                method: method.to_string(),
                sent_at: Instant::now(),
            },
        );
        Ok(key)
    }

    /// Retire `key` and return its owner.
    pub fn resolve(&self, key: CorrelationKey) -> Result<PendingEntry, RegistryError> {
        self.inner
            .lock()
            .take_pending(key)
            .ok_or(RegistryError::UnknownCorrelation { key })
    }

    /// Undo a registration whose request never reached the child.
    pub fn cancel(&self, key: CorrelationKey) -> Option<PendingEntry> {
        self.inner.lock().take_pending(key)
    }

    /// Drain every pending request (the child is gone).
    pub fn fail_all(&self) -> Vec<(CorrelationKey, PendingEntry)> {
        let mut inner = self.inner.lock();
        for session in inner.sessions.values_mut() {
            session.pending.clear();
        }
        let mut drained: Vec<_> = inner.pending.drain().collect();
        drained.sort_by_key(|(key, _)| *key);
        drained
    }

    /// Drain requests that have been pending for at least `timeout`.
    pub fn expire(&self, timeout: Duration) -> Vec<(CorrelationKey, PendingEntry)> {
        let mut inner = self.inner.lock();
        let overdue: Vec<CorrelationKey> = inner
            .pending
            .iter()
            .filter(|(_, entry)| entry.sent_at.elapsed() >= timeout)
            .map(|(key, _)| *key)
            .collect();
        let mut expired: Vec<_> = overdue
            .into_iter()
            .filter_map(|key| inner.take_pending(key).map(|entry| (key, entry)))
            .collect();
        expired.sort_by_key(|(key, _)| *key);
        expired
    }

    /// Record client activity. Returns false if the session is not open.
    pub fn touch(&self, id: &SessionId) -> bool {
        match self.inner.lock().sessions.get_mut(id) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Mark the session's response stream as attached. From then on the
    /// stream's lifetime, not idleness, decides when the session ends.
    pub fn attach_stream(&self, id: &SessionId) -> bool {
        match self.inner.lock().sessions.get_mut(id) {
            Some(session) => {
                session.stream_attached = true;
                true
            }
            None => false,
        }
    }

    /// Sessions with no attached stream and no client activity for `idle`.
    pub fn idle_sessions(&self, idle: Duration) -> Vec<SessionId> {
        self.inner
            .lock()
            .sessions
            .iter()
            .filter(|(_, s)| !s.stream_attached && s.last_activity.elapsed() >= idle)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_open(&self, id: &SessionId) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.inner.lock().sessions.keys().copied().collect()
    }

    pub fn session_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn snapshot(&self, id: &SessionId) -> Option<SessionInfo> {
        let inner = self.inner.lock();
        let session = inner.sessions.get(id)?;
        Some(SessionInfo {
            id: *id,
            created_at: session.created_at,
            pending_ids: session.pending.keys().cloned().collect(),
            stream_attached: session.stream_attached,
            alive: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(usize::MAX)
    }

    #[test]
    fn test_same_client_id_in_two_sessions_gets_distinct_keys() {
        let reg = registry();
        let a = reg.open().unwrap();
        let b = reg.open().unwrap();

        let ka = reg.register(&a, JsonRpcId::Number(1), "ping").unwrap();
        let kb = reg.register(&b, JsonRpcId::Number(1), "ping").unwrap();
        assert_ne!(ka, kb);

        let ea = reg.resolve(ka).unwrap();
        assert_eq!(ea.session_id, a);
        assert_eq!(ea.client_id, JsonRpcId::Number(1));
        let eb = reg.resolve(kb).unwrap();
        assert_eq!(eb.session_id, b);
    }

    #[test]
    fn test_duplicate_pending_id_rejected() {
        let reg = registry();
        let s = reg.open().unwrap();
        let key = reg.register(&s, JsonRpcId::String("x".into()), "ping").unwrap();
        let err = reg
            .register(&s, JsonRpcId::String("x".into()), "ping")
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateId { .. }));

        reg.resolve(key).unwrap();
        assert!(reg.register(&s, JsonRpcId::String("x".into()), "ping").is_ok());
    }

    #[test]
    fn test_number_and_string_ids_are_distinct() {
        let reg = registry();
        let s = reg.open().unwrap();
        reg.register(&s, JsonRpcId::Number(1), "a").unwrap();
        assert!(reg.register(&s, JsonRpcId::String("1".into()), "a").is_ok());
    }

    #[test]
    fn test_register_on_closed_session() {
        let reg = registry();
        let s = reg.open().unwrap();
        reg.close(&s);
        let err = reg.register(&s, JsonRpcId::Number(1), "ping").unwrap_err();
        assert!(matches!(err, RegistryError::SessionClosed { .. }));
    }

    #[test]
    fn test_resolve_twice_is_unknown() {
        let reg = registry();
        let s = reg.open().unwrap();
        let key = reg.register(&s, JsonRpcId::Number(1), "ping").unwrap();
        reg.resolve(key).unwrap();
        assert_eq!(
            reg.resolve(key).unwrap_err(),
            RegistryError::UnknownCorrelation { key }
        );
    }

    #[test]
    fn test_close_abandons_only_that_session() {
        let reg = registry();
        let a = reg.open().unwrap();
        let b = reg.open().unwrap();
        let ka1 = reg.register(&a, JsonRpcId::Number(1), "slow").unwrap();
        let ka2 = reg.register(&a, JsonRpcId::Number(2), "slow").unwrap();
        let kb = reg.register(&b, JsonRpcId::Number(1), "slow").unwrap();

        let mut abandoned: Vec<_> = reg.close(&a).unwrap().into_iter().map(|(k, _)| k).collect();
        abandoned.sort();
        assert_eq!(abandoned, vec![ka1, ka2]);

        assert!(reg.resolve(ka1).is_err());
        assert_eq!(reg.resolve(kb).unwrap().session_id, b);
        assert!(!reg.is_open(&a));
        assert!(reg.close(&a).is_none());
    }

    #[test]
    fn test_cancel_frees_client_id() {
        let reg = registry();
        let s = reg.open().unwrap();
        let key = reg.register(&s, JsonRpcId::Number(9), "ping").unwrap();
        assert!(reg.cancel(key).is_some());
        assert_eq!(reg.pending_count(), 0);
        assert!(reg.register(&s, JsonRpcId::Number(9), "ping").is_ok());
    }

    #[test]
    fn test_fail_all_drains_everything_but_keeps_sessions() {
        let reg = registry();
        let a = reg.open().unwrap();
        let b = reg.open().unwrap();
        reg.register(&a, JsonRpcId::Number(1), "x").unwrap();
        reg.register(&b, JsonRpcId::Number(1), "x").unwrap();

        let failed = reg.fail_all();
        assert_eq!(failed.len(), 2);
        assert_eq!(reg.pending_count(), 0);
        assert_eq!(reg.session_count(), 2);
        assert!(reg.snapshot(&a).unwrap().pending_ids.is_empty());
    }

    #[test]
    fn test_expire_only_overdue() {
        let reg = registry();
        let s = reg.open().unwrap();
        let old = reg.register(&s, JsonRpcId::Number(1), "slow").unwrap();
        std::thread::sleep(Duration::from_millis(30));
        let fresh = reg.register(&s, JsonRpcId::Number(2), "slow").unwrap();

        let expired = reg.expire(Duration::from_millis(20));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, old);
        assert!(reg.resolve(fresh).is_ok());
    }

    #[test]
    fn test_session_limit() {
        let reg = SessionRegistry::new(2);
        let a = reg.open().unwrap();
        reg.open().unwrap();
        assert_eq!(
            reg.open().unwrap_err(),
            RegistryError::SessionLimitReached { max_sessions: 2 }
        );
        reg.close(&a);
        assert!(reg.open().is_ok());
    }

    #[test]
    fn test_snapshot() {
        let reg = registry();
        let s = reg.open().unwrap();
        reg.register(&s, JsonRpcId::String("q".into()), "x").unwrap();
        let info = reg.snapshot(&s).unwrap();
        assert!(info.alive);
        assert_eq!(info.pending_ids, vec![JsonRpcId::String("q".into())]);
        assert_eq!(reg.session_ids(), vec![s]);
    }

    #[test]
    fn test_idle_sessions_skip_attached_and_active() {
        let reg = registry();
        let streamless = reg.open().unwrap();
        let attached = reg.open().unwrap();
        let busy = reg.open().unwrap();
        assert!(reg.attach_stream(&attached));
        assert!(reg.snapshot(&attached).unwrap().stream_attached);

        std::thread::sleep(Duration::from_millis(30));
        reg.register(&busy, JsonRpcId::Number(1), "ping").unwrap();

        assert_eq!(reg.idle_sessions(Duration::from_millis(20)), vec![streamless]);
        assert!(reg.touch(&streamless));
        assert!(reg.idle_sessions(Duration::from_millis(20)).is_empty());

        reg.close(&streamless);
        assert!(!reg.touch(&streamless));
        assert!(!reg.attach_stream(&streamless));
    }

    proptest! {
        /// Keys are unique across sessions regardless of the client ids used.
        #[test]
        fn prop_keys_never_collide(ids in proptest::collection::vec((0usize..4, 0i64..8), 1..64)) {
            let reg = registry();
            let sessions: Vec<_> = (0..4).map(|_| reg.open().unwrap()).collect();
            let mut seen = HashSet::new();
            for (session, client_id) in ids {
                if let Ok(key) = reg.register(&sessions[session], JsonRpcId::Number(client_id.into()), "m") {
                    prop_assert!(seen.insert(key));
                    let entry = reg.resolve(key).unwrap();
                    prop_assert_eq!(entry.session_id, sessions[session]);
                    prop_assert_eq!(entry.client_id, JsonRpcId::Number(client_id.into()));
                }
            }
        }
    }
}
