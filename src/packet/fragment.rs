//! Reassembly of fragmented frames.
//!
//! Fragments of one frame share a session and a base sequence number
//! (`seq_num - fragment_id`). Incomplete frames are dropped after the
//! reassembly timeout, and at most `max_pending` frames are held at once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};
use zeroize::Zeroize;

use super::header::PacketHeader;
use crate::core::{SessionId, SvtpConfig, SvtpError, SvtpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FrameKey {
    session_id: SessionId,
    base_seq: u32,
}

#[derive(Debug)]
struct PendingFrame {
    total: u16,
    parts: Vec<Option<Vec<u8>>>,
    received: u16,
    first_seen: Instant,
}

impl PendingFrame {
    fn discard(mut self) {
        for part in self.parts.iter_mut().flatten() {
            part.zeroize();
        }
    }
}

/// Collects fragments until their frame is complete.
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<FrameKey, PendingFrame>,
    timeout: Duration,
    max_pending: usize,
}

impl Reassembler {
    /// Create a reassembler.
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            pending: HashMap::new(),
            timeout,
            max_pending: max_pending.max(1),
        }
    }

    /// Create a reassembler from `reassembly_timeout` and `max_pending_frames`.
    pub fn from_config(config: &SvtpConfig) -> Self {
        Self::new(config.reassembly_timeout, config.max_pending_frames)
    }

    /// Frames currently waiting for fragments.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Add one decrypted fragment.
    ///
    /// Returns the whole frame once its last fragment arrives. Unfragmented
    /// packets pass straight through. Duplicate fragments are ignored.
    ///
    /// # Errors
    ///
    /// [`SvtpError::InvalidFragment`] if the index is out of range or the
    /// fragment count disagrees with earlier fragments of the same frame.
    pub fn insert(
        &mut self,
        header: &PacketHeader,
        payload: Vec<u8>,
    ) -> SvtpResult<Option<Vec<u8>>> {
        let invalid = SvtpError::InvalidFragment {
            fragment_id: header.fragment_id,
            total_fragments: header.total_fragments,
        };

        if !header.is_fragmented() {
            if header.fragment_id != 0 {
                return Err(invalid);
            }
            return Ok(Some(payload));
        }
        if header.fragment_id >= header.total_fragments {
            return Err(invalid);
        }

        self.expire();

        let key = FrameKey {
            session_id: header.session_id,
            base_seq: header.seq_num.wrapping_sub(u32::from(header.fragment_id)),
        };
        if !self.pending.contains_key(&key) && self.pending.len() >= self.max_pending {
            self.evict_oldest();
        }

        let frame = self.pending.entry(key).or_insert_with(|| PendingFrame {
            total: header.total_fragments,
            parts: vec![None; usize::from(header.total_fragments)],
            received: 0,
            first_seen: Instant::now(),
        });
        if frame.total != header.total_fragments {
            return Err(invalid);
        }

        let slot = &mut frame.parts[usize::from(header.fragment_id)];
        if slot.is_some() {
            trace!(
                session = %header.session_id,
                seq = header.seq_num,
                "duplicate fragment ignored"
            );
            return Ok(None);
        }
        *slot = Some(payload);
        frame.received += 1;
        if frame.received < frame.total {
            return Ok(None);
        }

        let Some(frame) = self.pending.remove(&key) else {
            return Ok(None);
        };
        let mut whole = Vec::new();
        for part in frame.parts.into_iter().flatten() {
            whole.extend_from_slice(&part);
        }
        trace!(
            session = %header.session_id,
            base_seq = key.base_seq,
            len = whole.len(),
            "frame reassembled"
        );
        Ok(Some(whole))
    }

    /// Drop frames older than the reassembly timeout.
    ///
    /// Returns the number dropped.
    pub fn expire(&mut self) -> usize {
        let timeout = self.timeout;
        let expired: Vec<FrameKey> = self
            .pending
            .iter()
            .filter(|(_, frame)| frame.first_seen.elapsed() > timeout)
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            if let Some(frame) = self.pending.remove(key) {
                debug!(
                    session = %key.session_id,
                    base_seq = key.base_seq,
                    received = frame.received,
                    total = frame.total,
                    "incomplete frame expired"
                );
                frame.discard();
            }
        }
        expired.len()
    }

    /// Forget every pending fragment belonging to `session_id`.
    pub fn forget_session(&mut self, session_id: SessionId) {
        let keys: Vec<FrameKey> = self
            .pending
            .keys()
            .filter(|key| key.session_id == session_id)
            .copied()
            .collect();
        for key in keys {
            if let Some(frame) = self.pending.remove(&key) {
                frame.discard();
            }
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, frame)| frame.first_seen)
            .map(|(key, _)| *key);
        if let Some(key) = oldest {
            if let Some(frame) = self.pending.remove(&key) {
                debug!(
                    session = %key.session_id,
                    base_seq = key.base_seq,
                    "reassembly full, evicting oldest frame"
                );
                frame.discard();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DIGEST_SIZE, IV_SIZE};

    fn header(session: u32, seq: u32, fragment_id: u16, total: u16) -> PacketHeader {
        PacketHeader {
            session_id: SessionId::new(session),
            seq_num: seq,
            fragment_id,
            total_fragments: total,
            payload_len: 0,
            iv: [0u8; IV_SIZE],
            digest: [0u8; DIGEST_SIZE],
        }
    }

    fn reassembler() -> Reassembler {
        Reassembler::new(Duration::from_secs(2), 4)
    }

    #[test]
    fn test_unfragmented_passthrough() {
        let mut r = reassembler();
        assert_eq!(r.insert(&header(1, 0, 0, 1), vec![1, 2]).unwrap(), Some(vec![1, 2]));
        assert_eq!(r.insert(&header(1, 1, 0, 0), vec![3]).unwrap(), Some(vec![3]));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut r = reassembler();
        // Frame occupies sequence numbers 10..13.
        assert_eq!(r.insert(&header(1, 12, 2, 3), vec![5, 6]).unwrap(), None);
        assert_eq!(r.insert(&header(1, 10, 0, 3), vec![1, 2]).unwrap(), None);
        assert_eq!(r.pending(), 1);

        let frame = r.insert(&header(1, 11, 1, 3), vec![3, 4]).unwrap();
        assert_eq!(frame, Some(vec![1, 2, 3, 4, 5, 6]));
        assert_eq!(r.pending(), 0);
    }

    #[test]
    fn test_duplicates_ignored() {
        let mut r = reassembler();
        assert_eq!(r.insert(&header(1, 0, 0, 2), vec![1]).unwrap(), None);
        assert_eq!(r.insert(&header(1, 0, 0, 2), vec![9]).unwrap(), None);
        assert_eq!(r.insert(&header(1, 1, 1, 2), vec![2]).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_sessions_kept_apart() {
        let mut r = reassembler();
        assert_eq!(r.insert(&header(1, 0, 0, 2), vec![1]).unwrap(), None);
        assert_eq!(r.insert(&header(2, 1, 1, 2), vec![2]).unwrap(), None);
        assert_eq!(r.pending(), 2);
    }

    #[test]
    fn test_invalid_fragments() {
        let mut r = reassembler();
        assert!(matches!(
            r.insert(&header(1, 5, 3, 3), vec![]),
            Err(SvtpError::InvalidFragment { fragment_id: 3, total_fragments: 3 })
        ));
        assert!(r.insert(&header(1, 5, 1, 1), vec![]).is_err());

        assert_eq!(r.insert(&header(1, 0, 0, 3), vec![1]).unwrap(), None);
        assert!(matches!(
            r.insert(&header(1, 1, 1, 4), vec![2]),
            Err(SvtpError::InvalidFragment { .. })
        ));
    }

    #[test]
    fn test_incomplete_frames_expire() {
        let mut r = Reassembler::new(Duration::from_millis(20), 4);
        assert_eq!(r.insert(&header(1, 0, 0, 2), vec![1]).unwrap(), None);

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(r.expire(), 1);
        assert_eq!(r.pending(), 0);

        // The late fragment starts a fresh, incomplete frame.
        assert_eq!(r.insert(&header(1, 1, 1, 2), vec![2]).unwrap(), None);
    }

    #[test]
    fn test_pending_cap_evicts_oldest() {
        let mut r = Reassembler::new(Duration::from_secs(2), 2);
        assert_eq!(r.insert(&header(1, 0, 0, 2), vec![1]).unwrap(), None);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(r.insert(&header(1, 10, 0, 2), vec![1]).unwrap(), None);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(r.insert(&header(1, 20, 0, 2), vec![1]).unwrap(), None);
        assert_eq!(r.pending(), 2);

        // The first frame was evicted, so its second half starts over.
        assert_eq!(r.insert(&header(1, 1, 1, 2), vec![2]).unwrap(), None);
        assert_eq!(r.insert(&header(1, 21, 1, 2), vec![2]).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_forget_session() {
        let mut r = reassembler();
        r.insert(&header(1, 0, 0, 2), vec![1]).unwrap();
        r.insert(&header(2, 0, 0, 2), vec![1]).unwrap();

        r.forget_session(SessionId::new(1));
        assert_eq!(r.pending(), 1);
    }
}
