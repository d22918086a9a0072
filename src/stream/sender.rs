//! Sender-side frame delivery
//!
//! Pads each frame to the cipher block size, seals it as one or more
//! fragments and delivers every fragment with ACK and retry. Congestion
//! window and RTT bookkeeping follow each delivery.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::{DigestScope, FrameSource, SvtpError, SvtpResult};
use crate::crypto::{SessionKeys, pkcs7_pad};
use crate::packet::{PacketCodec, PacketHeader};
use crate::session::SessionHandle;
use crate::transport::ReliableTransport;

/// Outcome of sending one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// Packets the frame was split into
    pub fragments: usize,
    /// Sends made across all fragments, retries included
    pub attempts: u32,
}

/// Totals from draining a frame source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Frames delivered in full
    pub sent: u64,
    /// Frames abandoned after a delivery failure
    pub dropped: u64,
}

/// Sends frames for one session to its peer
#[derive(Debug)]
pub struct FrameSender {
    codec: Arc<PacketCodec>,
    transport: Arc<ReliableTransport>,
    session: SessionHandle,
    keys: SessionKeys,
}

impl FrameSender {
    /// Create a sender for `session`, delivering to the session's peer
    ///
    /// # Errors
    ///
    /// [`SvtpError::Config`] unless the codec digests with
    /// [`DigestScope::Header`]. The receiving side trusts sequence and
    /// fragment fields, so they must be authenticated.
    pub fn new(
        codec: Arc<PacketCodec>,
        transport: Arc<ReliableTransport>,
        session: SessionHandle,
        keys: SessionKeys,
    ) -> SvtpResult<Self> {
        if codec.digest_scope() != DigestScope::Header {
            return Err(SvtpError::Config(
                "frame streams require DigestScope::Header".into(),
            ));
        }
        Ok(Self {
            codec,
            transport,
            session,
            keys,
        })
    }

    /// The session this sender writes to
    pub fn session(&self) -> SessionHandle {
        self.session
    }

    /// Seal and deliver one frame.
    ///
    /// Fragments go out in order, each acknowledged before the next is sent.
    /// The congestion window grows on every ACK and shrinks once if a
    /// fragment cannot be delivered, which abandons the rest of the frame.
    pub async fn send_frame(&self, frame: &[u8]) -> SvtpResult<FrameReport> {
        let padded = pkcs7_pad(frame);
        let packets = self.codec.build_fragments(
            self.session.id(),
            &padded,
            self.keys.key(),
            self.keys.salt(),
        )?;

        let registry = self.codec.registry();
        let dest = self.session.peer();
        let mut attempts = 0;

        for packet in &packets {
            let seq_num = PacketHeader::from_bytes(packet)?.seq_num;
            match self.transport.deliver(dest, packet, seq_num).await {
                Ok(delivery) => {
                    attempts += delivery.attempts;
                    registry.adjust_congestion_window(&self.session, true)?;
                    registry.record_rtt(&self.session, delivery.rtt)?;
                }
                Err(e) => {
                    if let Err(window_err) = registry.adjust_congestion_window(&self.session, false)
                    {
                        debug!(error = %window_err, "window not adjusted");
                    }
                    return Err(e);
                }
            }
        }

        Ok(FrameReport {
            fragments: packets.len(),
            attempts,
        })
    }

    /// Send every frame from `source` until it runs dry.
    ///
    /// A frame that cannot be delivered is dropped and the pump moves on.
    /// Errors that end the session (expiry, sequence exhaustion) stop the
    /// pump and are returned.
    pub async fn pump<S: FrameSource>(&self, source: &mut S) -> SvtpResult<PumpStats> {
        let mut stats = PumpStats::default();

        while let Some(frame) = source.next_frame() {
            match self.send_frame(&frame).await {
                Ok(_) => stats.sent += 1,
                Err(e) if e.is_fatal() => {
                    warn!(session = %self.session.id(), error = %e, "stream aborted");
                    return Err(e);
                }
                Err(e) => {
                    warn!(session = %self.session.id(), error = %e, "frame dropped");
                    stats.dropped += 1;
                }
            }
        }

        debug!(
            session = %self.session.id(),
            sent = stats.sent,
            dropped = stats.dropped,
            "frame source drained"
        );
        Ok(stats)
    }
}
