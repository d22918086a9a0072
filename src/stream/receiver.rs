//! Receiver-side frame assembly
//!
//! Every authenticated packet is ACKed, including retransmissions of packets
//! already delivered, so a sender whose ACK was lost stops retrying. Each
//! sequence number reaches reassembly at most once. Anything that fails
//! validation is dropped without a reply.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use zeroize::Zeroize;

use super::replay::SequenceWindow;
use crate::core::{
    DigestScope, FrameSink, PACKET_HEADER_SIZE, SessionId, SvtpConfig, SvtpError, SvtpResult,
};
use crate::crypto::{SessionKeys, pkcs7_unpad};
use crate::packet::{PacketCodec, Reassembler, peek_session_id};
use crate::session::SessionHandle;
use crate::transport::{Inbound, ReliableTransport};

/// Receive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Frames handed to the sink
    pub delivered: u64,
    /// Datagrams rejected
    pub dropped: u64,
    /// Retransmissions ACKed again but not redelivered
    pub duplicates: u64,
}

/// Turns inbound datagrams into frames for a [`FrameSink`]
#[derive(Debug)]
pub struct FrameReceiver {
    codec: Arc<PacketCodec>,
    transport: Arc<ReliableTransport>,
    keys: HashMap<SessionId, SessionKeys>,
    windows: HashMap<SessionId, SequenceWindow>,
    reassembler: Reassembler,
    stats: ReceiverStats,
}

impl FrameReceiver {
    /// Create a receiver with no sessions.
    ///
    /// # Errors
    ///
    /// [`SvtpError::Config`] unless the codec digests with
    /// [`DigestScope::Header`]. Duplicate suppression and reassembly key on
    /// the sequence and fragment fields, so those must be authenticated.
    pub fn new(
        codec: Arc<PacketCodec>,
        transport: Arc<ReliableTransport>,
        config: &SvtpConfig,
    ) -> SvtpResult<Self> {
        if codec.digest_scope() != DigestScope::Header {
            return Err(SvtpError::Config(
                "frame streams require DigestScope::Header".into(),
            ));
        }
        Ok(Self {
            codec,
            transport,
            keys: HashMap::new(),
            windows: HashMap::new(),
            reassembler: Reassembler::from_config(config),
            stats: ReceiverStats::default(),
        })
    }

    /// Register the key material for an existing session.
    pub fn add_session_keys(&mut self, id: SessionId, keys: SessionKeys) {
        self.keys.insert(id, keys);
        self.windows.insert(id, SequenceWindow::new());
    }

    /// Forget a session's keys, duplicate window and pending fragments.
    ///
    /// Returns `false` if no keys were registered.
    pub fn remove_session_keys(&mut self, id: SessionId) -> bool {
        self.windows.remove(&id);
        self.reassembler.forget_session(id);
        self.keys.remove(&id).is_some()
    }

    /// Adopt a session announced by the peer and register its keys.
    ///
    /// # Errors
    ///
    /// [`SvtpError::InvalidArgument`] if the id is zero or already live.
    pub fn accept_session(
        &mut self,
        id: SessionId,
        peer: SocketAddr,
        keys: SessionKeys,
    ) -> SvtpResult<SessionHandle> {
        let handle = self.codec.registry().adopt_session(id, peer)?;
        self.add_session_keys(id, keys);
        debug!(session = %id, %peer, "session accepted");
        Ok(handle)
    }

    /// Counters so far.
    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Validate one datagram and return a frame if it completes one.
    ///
    /// `Ok(None)` means the packet was accepted but no frame is ready yet,
    /// or the packet was a retransmission.
    pub async fn handle_datagram(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
    ) -> SvtpResult<Option<Vec<u8>>> {
        let id = peek_session_id(bytes).ok_or(SvtpError::Truncated {
            expected: PACKET_HEADER_SIZE,
            actual: bytes.len(),
        })?;
        let keys = self.keys.get(&id).ok_or(SvtpError::SessionNotFound(id))?;

        let parsed = match self.codec.parse(bytes, keys.key(), keys.salt()) {
            Ok(parsed) => parsed,
            Err(SvtpError::SessionNotFound(id)) => {
                // Expired in the registry; nothing of it is worth keeping here.
                self.remove_session_keys(id);
                return Err(SvtpError::SessionNotFound(id));
            }
            Err(e) => return Err(e),
        };
        let header = parsed.header;
        let mut payload = parsed.payload;

        if let Err(e) = self.transport.send_ack(from, header.seq_num).await {
            warn!(session = %id, seq = header.seq_num, error = %e, "ack not sent");
        }

        let window = self.windows.entry(id).or_default();
        if !window.check_and_mark(header.seq_num) {
            trace!(session = %id, seq = header.seq_num, "duplicate packet");
            self.stats.duplicates += 1;
            payload.zeroize();
            return Ok(None);
        }

        let Some(mut whole) = self.reassembler.insert(&header, payload)? else {
            return Ok(None);
        };
        let frame = pkcs7_unpad(&whole).map(<[u8]>::to_vec);
        whole.zeroize();
        Ok(Some(frame?))
    }

    /// Handle one inbound datagram, passing any completed frame to `sink`.
    ///
    /// Failures are counted and logged, never surfaced.
    pub async fn process<S>(&mut self, inbound: Inbound, sink: &mut S)
    where
        S: FrameSink + ?Sized,
    {
        match self.handle_datagram(&inbound.bytes, inbound.from).await {
            Ok(Some(mut frame)) => {
                sink.deliver(&frame);
                frame.zeroize();
                self.stats.delivered += 1;
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.dropped += 1;
                if matches!(e, SvtpError::IntegrityFailure) {
                    warn!(from = %inbound.from, "packet failed integrity check");
                } else {
                    debug!(from = %inbound.from, error = %e, "packet dropped");
                }
            }
        }
    }

    /// Feed `sink` from `inbound` until the channel closes.
    pub async fn run<S>(
        &mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        sink: &mut S,
    ) -> ReceiverStats
    where
        S: FrameSink + ?Sized,
    {
        while let Some(datagram) = inbound.recv().await {
            self.process(datagram, sink).await;
        }
        debug!(
            delivered = self.stats.delivered,
            dropped = self.stats.dropped,
            duplicates = self.stats.duplicates,
            "inbound channel closed"
        );
        self.stats
    }
}
