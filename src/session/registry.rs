//! The session registry.
//!
//! Single source of truth for live sessions. Every operation takes one
//! mutex for a short, non-blocking critical section, so all lookups and
//! mutations are linearizable. Session churn is low next to packet rate, so
//! one coarse lock is enough.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, trace};

use super::session::{Session, SessionHandle, SessionSnapshot};
use crate::core::{SessionId, SvtpConfig, SvtpError, SvtpResult};

#[derive(Debug)]
struct RegistryInner {
    sessions: HashMap<SessionId, Session>,
    next_id: u32,
}

impl RegistryInner {
    /// Next identifier that is neither zero nor currently held.
    fn allocate_id(&mut self) -> SessionId {
        loop {
            let candidate = SessionId::new(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if candidate.as_u32() != 0 && !self.sessions.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// The live session `handle` names, provided it still belongs to the
    /// same peer. A session adopted under a recycled identifier does not
    /// answer to handles issued for its predecessor.
    fn live_for(&mut self, handle: &SessionHandle, timeout: Duration) -> Option<&mut Session> {
        self.live(handle.id(), timeout)
            .filter(|session| session.peer() == handle.peer())
    }

    /// Look up a session, evicting it if it has expired.
    fn live(&mut self, id: SessionId, timeout: Duration) -> Option<&mut Session> {
        let expired = !self.sessions.get(&id)?.is_live(timeout);
        if expired {
            self.sessions.remove(&id);
            debug!(session = %id, "session expired on lookup");
            return None;
        }
        self.sessions.get_mut(&id)
    }
}

/// Registry of live sessions.
///
/// Constructed explicitly and shared by `Arc` with whichever components
/// need it. The liveness timeout is fixed at construction and governs both
/// lazy expiry on lookup and [`SessionRegistry::sweep`].
///
/// # Example
///
/// ```
/// use svtp_protocol::session::SessionRegistry;
///
/// let registry = SessionRegistry::default();
/// let id = registry.create_session("127.0.0.1:5000".parse().unwrap());
///
/// let handle = registry.get_session(id).unwrap();
/// assert_eq!(registry.next_sequence(&handle).unwrap(), 0);
/// assert_eq!(registry.next_sequence(&handle).unwrap(), 1);
/// ```
#[derive(Debug)]
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    liveness_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(&SvtpConfig::default())
    }
}

impl SessionRegistry {
    /// Create an empty registry using `config.liveness_timeout`.
    pub fn new(config: &SvtpConfig) -> Self {
        Self::with_liveness_timeout(config.liveness_timeout)
    }

    /// Create an empty registry with an explicit liveness timeout.
    pub fn with_liveness_timeout(liveness_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                sessions: HashMap::new(),
                next_id: 1,
            }),
            liveness_timeout,
        }
    }

    /// The canonical session timeout.
    pub fn liveness_timeout(&self) -> Duration {
        self.liveness_timeout
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        // Critical sections never leave the map half-updated, so a poisoned
        // lock still guards consistent state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on a live session, refreshing its activity.
    fn with_live<T>(
        &self,
        handle: &SessionHandle,
        f: impl FnOnce(&mut Session) -> T,
    ) -> SvtpResult<T> {
        let mut inner = self.lock();
        let session = inner
            .live_for(handle, self.liveness_timeout)
            .ok_or(SvtpError::SessionNotFound(handle.id()))?;
        session.touch();
        Ok(f(session))
    }

    /// Register a new session for `peer` and return its identifier.
    ///
    /// Identifiers start at 1 and increase; after wrapping, zero and any
    /// identifier still held by a live entry are skipped.
    pub fn create_session(&self, peer: SocketAddr) -> SessionId {
        let mut inner = self.lock();
        let id = inner.allocate_id();
        inner.sessions.insert(id, Session::new(peer));
        debug!(session = %id, %peer, "session created");
        id
    }

    /// Register a session under an identifier chosen by the peer.
    ///
    /// Used by a receiving process to admit a session announced out of
    /// band. An expired entry with the same identifier is replaced; a live
    /// one is an error.
    pub fn adopt_session(&self, id: SessionId, peer: SocketAddr) -> SvtpResult<SessionHandle> {
        if id.as_u32() == 0 {
            return Err(SvtpError::invalid_argument("session id 0 is reserved"));
        }

        let mut inner = self.lock();
        if inner.live(id, self.liveness_timeout).is_some() {
            return Err(SvtpError::invalid_argument(format!(
                "session {id} is already live"
            )));
        }
        inner.sessions.insert(id, Session::new(peer));
        debug!(session = %id, %peer, "session adopted");
        Ok(SessionHandle::new(id, peer))
    }

    /// Look up a live session, refreshing its activity.
    ///
    /// An expired session is removed and reported as absent.
    pub fn get_session(&self, id: SessionId) -> Option<SessionHandle> {
        let mut inner = self.lock();
        let session = inner.live(id, self.liveness_timeout)?;
        session.touch();
        Some(SessionHandle::new(id, session.peer()))
    }

    /// Check for a live session without refreshing its activity.
    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().live(id, self.liveness_timeout).is_some()
    }

    /// Remove a session. Returns whether it existed.
    pub fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.lock().sessions.remove(&id).is_some();
        if removed {
            debug!(session = %id, "session removed");
        }
        removed
    }

    /// Remove every session idle for longer than `timeout`.
    ///
    /// Returns the number removed.
    pub fn sweep_expired(&self, timeout: Duration) -> usize {
        let mut inner = self.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|id, session| {
            let keep = session.is_live(timeout);
            if !keep {
                trace!(session = %id, "sweeping idle session");
            }
            keep
        });
        let removed = before - inner.sessions.len();
        if removed > 0 {
            debug!(removed, remaining = inner.sessions.len(), "swept expired sessions");
        }
        removed
    }

    /// [`sweep_expired`](Self::sweep_expired) with the registry's liveness timeout.
    pub fn sweep(&self) -> usize {
        self.sweep_expired(self.liveness_timeout)
    }

    /// Number of stored sessions, including any not yet found expired.
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Check if the registry holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Issue the session's next sequence number.
    ///
    /// Numbers start at 0 and are strictly increasing with no reuse; once
    /// `u32::MAX` has been issued the session fails with
    /// [`SvtpError::SequenceExhausted`].
    pub fn next_sequence(&self, handle: &SessionHandle) -> SvtpResult<u32> {
        self.reserve_sequences(handle, 1)
    }

    /// Claim `count` consecutive sequence numbers and return the first.
    pub fn reserve_sequences(&self, handle: &SessionHandle, count: u32) -> SvtpResult<u32> {
        if count == 0 {
            return Err(SvtpError::invalid_argument("cannot reserve zero sequence numbers"));
        }
        self.with_live(handle, |session| session.reserve(count))?
            .ok_or(SvtpError::SequenceExhausted(handle.id()))
    }

    /// Double the congestion window on ACK, halve it on loss.
    ///
    /// Returns the new window, always within `[1, 65535]`.
    pub fn adjust_congestion_window(
        &self,
        handle: &SessionHandle,
        ack_received: bool,
    ) -> SvtpResult<u32> {
        self.with_live(handle, |session| session.adjust_window(ack_received))
    }

    /// Fold an ACK round trip into the session's RTT estimate.
    pub fn record_rtt(&self, handle: &SessionHandle, sample: Duration) -> SvtpResult<()> {
        self.with_live(handle, |session| session.record_rtt(sample))
    }

    /// Copy out the session's bookkeeping.
    pub fn snapshot(&self, handle: &SessionHandle) -> SvtpResult<SessionSnapshot> {
        let mut inner = self.lock();
        inner
            .live_for(handle, self.liveness_timeout)
            .map(|session| session.snapshot(handle.id()))
            .ok_or(SvtpError::SessionNotFound(handle.id()))
    }
}
