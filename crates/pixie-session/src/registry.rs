use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::handle::SessionHandle;
use crate::state::SessionId;

type SessionMap<H> = HashMap<SessionId, H>;

/// Pending and accepted sessions of one server, keyed by [`SessionId`].
///
/// Each map has its own lock. Sessions removed from a map are closed only
/// after that map's lock has been released, so a slow close never blocks
/// routing.
pub struct SessionRegistry<H: SessionHandle> {
    pending: RwLock<SessionMap<H>>,
    accepted: RwLock<SessionMap<H>>,
}

impl<H: SessionHandle> SessionRegistry<H> {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            accepted: RwLock::new(HashMap::new()),
        }
    }

    /// Register a freshly connected session as pending.
    ///
    /// Any session already held for the same remote address is evicted and
    /// closed first. Insertion is skipped once `running` is false; the
    /// return value says whether the session was inserted.
    pub fn admit(&self, session: H, running: &AtomicBool) -> bool {
        let id = session.id();
        let remote = session.remote_addr();
        let mut evicted = take_matching(&mut write(&self.accepted), remote);

        let admitted = {
            let mut pending = write(&self.pending);
            evicted.extend(take_matching(&mut pending, remote));
            if running.load(Ordering::SeqCst) {
                pending.insert(id, session);
                true
            } else {
                false
            }
        };

        for stale in evicted {
            info!(session_id = %stale.id(), %remote, "evicting session from same remote address");
            close_logged(&stale);
        }

        if !admitted {
            debug!(session_id = %id, "server stopping; session not admitted");
        }
        admitted
    }

    /// Move a pending session to the accepted set.
    pub fn accept(&self, id: SessionId) -> Result<()> {
        let session = write(&self.pending)
            .remove(&id)
            .ok_or(SessionError::NotFound(id))?;
        write(&self.accepted).insert(id, session);
        debug!(session_id = %id, "session accepted");
        Ok(())
    }

    pub fn get_accepted(&self, id: SessionId) -> Option<H> {
        read(&self.accepted).get(&id).cloned()
    }

    /// Route `message` to an accepted session.
    ///
    /// Unknown or not-yet-accepted ids are logged and dropped.
    pub fn send<T>(&self, id: SessionId, message: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        match self.get_accepted(id) {
            Some(session) => session.send(message),
            None => {
                warn!(session_id = %id, "no accepted session with this id; message dropped");
                Ok(())
            }
        }
    }

    /// Forget a session that has already closed on its own.
    ///
    /// The session is not closed again. Returns it if either map held it.
    pub fn remove(&self, id: SessionId) -> Option<H> {
        let pending = write(&self.pending).remove(&id);
        let removed = pending.or_else(|| write(&self.accepted).remove(&id));
        if removed.is_some() {
            debug!(session_id = %id, "closed session removed from registry");
        }
        removed
    }

    /// Close and forget every session, pending first.
    ///
    /// Individual close failures are logged and do not stop the sweep.
    pub fn close_all(&self) {
        for map in [&self.pending, &self.accepted] {
            let drained: Vec<H> = write(map).drain().map(|(_, session)| session).collect();
            for session in drained {
                close_logged(&session);
            }
        }
    }

    pub fn is_pending(&self, id: SessionId) -> bool {
        read(&self.pending).contains_key(&id)
    }

    pub fn is_accepted(&self, id: SessionId) -> bool {
        read(&self.accepted).contains_key(&id)
    }

    pub fn pending_len(&self) -> usize {
        read(&self.pending).len()
    }

    pub fn accepted_len(&self) -> usize {
        read(&self.accepted).len()
    }
}

impl<H: SessionHandle> Default for SessionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn read<H>(map: &RwLock<SessionMap<H>>) -> RwLockReadGuard<'_, SessionMap<H>> {
    map.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<H>(map: &RwLock<SessionMap<H>>) -> RwLockWriteGuard<'_, SessionMap<H>> {
    map.write().unwrap_or_else(PoisonError::into_inner)
}

fn take_matching<H: SessionHandle>(map: &mut SessionMap<H>, remote: SocketAddr) -> Vec<H> {
    let ids: Vec<SessionId> = map
        .iter()
        .filter(|(_, session)| session.remote_addr() == remote)
        .map(|(id, _)| *id)
        .collect();
    ids.into_iter().filter_map(|id| map.remove(&id)).collect()
}

fn close_logged<H: SessionHandle>(session: &H) {
    if let Err(err) = session.close() {
        warn!(session_id = %session.id(), error = %err, "failed to close session");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::state::ConnectionState;

    /// Socket-free session that records what happened to it.
    #[derive(Clone)]
    struct MockSession {
        id: SessionId,
        remote: SocketAddr,
        closed: Arc<AtomicBool>,
        sent: Arc<Mutex<Vec<String>>>,
        fail_close: bool,
    }

    impl MockSession {
        fn from_port(port: u16) -> Self {
            Self {
                id: SessionId::new(),
                remote: SocketAddr::from(([10, 0, 0, 1], port)),
                closed: Arc::new(AtomicBool::new(false)),
                sent: Arc::new(Mutex::new(Vec::new())),
                fail_close: false,
            }
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl SessionHandle for MockSession {
        fn id(&self) -> SessionId {
            self.id
        }

        fn remote_addr(&self) -> SocketAddr {
            self.remote
        }

        fn state(&self) -> ConnectionState {
            if self.is_closed() {
                ConnectionState::Disconnected
            } else {
                ConnectionState::Connected
            }
        }

        fn open(&self) -> Result<()> {
            Ok(())
        }

        fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(SessionError::InvalidOperation("close failed"));
            }
            Ok(())
        }

        fn send<T>(&self, message: &T) -> Result<()>
        where
            T: Serialize + ?Sized,
        {
            if self.is_closed() {
                return Err(SessionError::InvalidOperation("connection isn't open"));
            }
            let encoded = serde_json::to_string(message).map_err(pixie_frame::SerializerError::from)?;
            self.sent.lock().unwrap().push(encoded);
            Ok(())
        }
    }

    fn running() -> AtomicBool {
        AtomicBool::new(true)
    }

    #[test]
    fn admitted_session_is_pending() {
        let registry = SessionRegistry::new();
        let session = MockSession::from_port(4000);

        assert!(registry.admit(session.clone(), &running()));
        assert!(registry.is_pending(session.id));
        assert!(!registry.is_accepted(session.id));
        assert_eq!(registry.pending_len(), 1);
    }

    #[test]
    fn accept_moves_session_once() {
        let registry = SessionRegistry::new();
        let session = MockSession::from_port(4001);
        registry.admit(session.clone(), &running());

        registry.accept(session.id).unwrap();
        assert!(registry.is_accepted(session.id));
        assert!(!registry.is_pending(session.id));

        let err = registry.accept(session.id).unwrap_err();
        assert!(matches!(err, SessionError::NotFound(id) if id == session.id));
        assert!(registry.is_accepted(session.id));
    }

    #[test]
    fn remove_forgets_pending_and_accepted_sessions() {
        let registry = SessionRegistry::new();
        let pending = MockSession::from_port(4010);
        let accepted = MockSession::from_port(4011);
        registry.admit(pending.clone(), &running());
        registry.admit(accepted.clone(), &running());
        registry.accept(accepted.id).unwrap();

        assert_eq!(registry.remove(pending.id).map(|s| s.id), Some(pending.id));
        assert_eq!(registry.remove(accepted.id).map(|s| s.id), Some(accepted.id));
        assert!(registry.remove(accepted.id).is_none());

        assert_eq!(registry.pending_len(), 0);
        assert_eq!(registry.accepted_len(), 0);
        assert!(!pending.is_closed());
        assert!(!accepted.is_closed());
    }

    #[test]
    fn accept_unknown_id_is_not_found() {
        let registry: SessionRegistry<MockSession> = SessionRegistry::new();
        assert!(matches!(
            registry.accept(SessionId::new()),
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn same_remote_evicts_accepted_and_pending() {
        let registry = SessionRegistry::new();
        let accepted = MockSession::from_port(5000);
        registry.admit(accepted.clone(), &running());
        registry.accept(accepted.id).unwrap();

        let mut pending = MockSession::from_port(5000);
        pending.id = SessionId::new();
        // Bypass eviction to hold two sessions for one remote at once.
        write(&registry.pending).insert(pending.id, pending.clone());

        let newcomer = MockSession::from_port(5000);
        assert!(registry.admit(newcomer.clone(), &running()));

        assert!(accepted.is_closed());
        assert!(pending.is_closed());
        assert!(!newcomer.is_closed());
        assert!(!registry.is_accepted(accepted.id));
        assert!(!registry.is_pending(pending.id));
        assert!(registry.is_pending(newcomer.id));
        assert_eq!(registry.pending_len(), 1);
        assert_eq!(registry.accepted_len(), 0);
    }

    #[test]
    fn different_remotes_coexist() {
        let registry = SessionRegistry::new();
        let a = MockSession::from_port(6000);
        let b = MockSession::from_port(6001);
        registry.admit(a.clone(), &running());
        registry.admit(b.clone(), &running());

        assert!(!a.is_closed());
        assert_eq!(registry.pending_len(), 2);
    }

    #[test]
    fn admit_skipped_when_not_running() {
        let registry = SessionRegistry::new();
        let session = MockSession::from_port(7000);

        assert!(!registry.admit(session.clone(), &AtomicBool::new(false)));
        assert!(!registry.is_pending(session.id));
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn send_routes_only_to_accepted() {
        let registry = SessionRegistry::new();
        let session = MockSession::from_port(7100);
        registry.admit(session.clone(), &running());

        registry.send(session.id, "early").unwrap();
        assert!(session.sent.lock().unwrap().is_empty());

        registry.accept(session.id).unwrap();
        registry.send(session.id, "hello").unwrap();
        assert_eq!(*session.sent.lock().unwrap(), vec![r#""hello""#.to_string()]);

        registry.send(SessionId::new(), "nobody").unwrap();
    }

    #[test]
    fn close_all_closes_everything_despite_failures() {
        let registry = SessionRegistry::new();
        let mut failing = MockSession::from_port(8000);
        failing.fail_close = true;
        let pending = MockSession::from_port(8001);
        let accepted = MockSession::from_port(8002);

        registry.admit(failing.clone(), &running());
        registry.admit(pending.clone(), &running());
        registry.admit(accepted.clone(), &running());
        registry.accept(accepted.id).unwrap();

        registry.close_all();

        assert!(failing.is_closed());
        assert!(pending.is_closed());
        assert!(accepted.is_closed());
        assert_eq!(registry.pending_len(), 0);
        assert_eq!(registry.accepted_len(), 0);

        registry.send(accepted.id, "after stop").unwrap();
        assert!(accepted.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn concurrent_admission_keeps_one_session_per_remote() {
        let registry = Arc::new(SessionRegistry::new());
        let flag = Arc::new(running());
        let admitted = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let flag = Arc::clone(&flag);
                let admitted = Arc::clone(&admitted);
                std::thread::spawn(move || {
                    for port in 9000..9010 {
                        if registry.admit(MockSession::from_port(port), &flag) {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 80);
        assert_eq!(registry.pending_len(), 10);
    }
}
