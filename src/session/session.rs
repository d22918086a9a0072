//! Per-peer session state.
//!
//! [`Session`] lives only inside the registry. Callers hold a
//! [`SessionHandle`], a plain value naming the session, and every operation
//! through it re-checks liveness under the registry lock.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::timing::RttEstimator;
use crate::core::{
    INITIAL_CONGESTION_WINDOW, MAX_CONGESTION_WINDOW, MIN_CONGESTION_WINDOW, SessionId,
};

/// One past the last sequence number a session may issue.
const SEQUENCE_SPACE: u64 = u32::MAX as u64 + 1;

/// Registry-owned session state.
#[derive(Debug)]
pub(crate) struct Session {
    peer: SocketAddr,
    /// Next sequence number to issue. Widened so exhaustion is observable.
    next_seq: u64,
    congestion_window: u32,
    rtt: RttEstimator,
    created_at: Instant,
    last_activity: Instant,
}

impl Session {
    pub(crate) fn new(peer: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            peer,
            next_seq: 0,
            congestion_window: INITIAL_CONGESTION_WINDOW,
            rtt: RttEstimator::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub(crate) fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn idle_time(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Live iff idle time does not exceed `timeout`.
    pub(crate) fn is_live(&self, timeout: Duration) -> bool {
        self.idle_time() <= timeout
    }

    /// Claim `count` consecutive sequence numbers, returning the first.
    pub(crate) fn reserve(&mut self, count: u32) -> Option<u32> {
        let end = self.next_seq.checked_add(u64::from(count))?;
        if end > SEQUENCE_SPACE {
            return None;
        }
        let first = u32::try_from(self.next_seq).ok()?;
        self.next_seq = end;
        Some(first)
    }

    /// Double on ACK, halve on loss, within the window bounds.
    pub(crate) fn adjust_window(&mut self, ack_received: bool) -> u32 {
        self.congestion_window = if ack_received {
            self.congestion_window
                .saturating_mul(2)
                .min(MAX_CONGESTION_WINDOW)
        } else {
            (self.congestion_window / 2).max(MIN_CONGESTION_WINDOW)
        };
        self.congestion_window
    }

    pub(crate) fn record_rtt(&mut self, sample: Duration) {
        self.rtt.update(sample);
    }

    pub(crate) fn snapshot(&self, id: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            id,
            peer: self.peer,
            next_sequence: self.next_seq,
            congestion_window: self.congestion_window,
            smoothed_rtt: self.rtt.srtt(),
            rto: self.rtt.rto(),
            idle: self.idle_time(),
            age: self.created_at.elapsed(),
        }
    }
}

/// Caller-side reference to a live session.
///
/// A handle does not keep the session alive. Registry operations taking a
/// handle fail with `SessionNotFound` once the session has expired or been
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: SessionId,
    peer: SocketAddr,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, peer: SocketAddr) -> Self {
        Self { id, peer }
    }

    /// The session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The peer address recorded when the session was created.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// Point-in-time copy of a session's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: SessionId,
    /// Peer address.
    pub peer: SocketAddr,
    /// Sequence number the next packet will carry.
    pub next_sequence: u64,
    /// Current congestion window.
    pub congestion_window: u32,
    /// Smoothed RTT (zero before the first ACK).
    pub smoothed_rtt: Duration,
    /// Retransmission timeout derived from the RTT estimate.
    pub rto: Duration,
    /// Time since last activity.
    pub idle: Duration,
    /// Time since creation.
    pub age: Duration,
}
