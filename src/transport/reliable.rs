//! Acknowledged delivery over UDP.
//!
//! `send_with_ack` runs a small state machine per attempt:
//!
//! ```text
//! Idle → Sending → WaitingAck ─┬─ ACK matched ──────────────→ Success
//!                              └─ timeout / mismatch → Backoff → Sending
//!                                 (retries exhausted)  ───────→ Timeout
//! ```
//!
//! ACKs are read straight from the socket unless the listener is running,
//! in which case the listener owns the read side and fans ACKs out to every
//! waiting sender.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};
use tracing::{debug, instrument, trace, warn};

use super::ack::{AckFrame, RetryPolicy};
use super::listener::{Inbound, Listener};
use super::socket::SvtpSocket;
use crate::core::{ACK_SIZE, PACKET_HEADER_SIZE, SvtpConfig, SvtpError, SvtpResult};

/// Outcome of a successful acknowledged send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    /// Sends made, including the one that was acknowledged.
    pub attempts: u32,
    /// Time from the acknowledged send to its ACK.
    pub rtt: Duration,
}

enum AckSource {
    Socket,
    Listener(broadcast::Receiver<(AckFrame, SocketAddr)>),
}

/// Best-effort reliable transport.
///
/// Safe to share by `Arc`. Concurrent [`send_with_ack`](Self::send_with_ack)
/// calls should run with the listener started, so that each ACK reaches the
/// sender waiting for it. A waiter only accepts ACKs sent from the address it
/// is delivering to.
///
/// Without the listener, a waiting sender owns the read side: data packets
/// that arrive during an ACK wait are discarded and logged at `debug`.
#[derive(Debug)]
pub struct ReliableTransport {
    socket: SvtpSocket,
    policy: RetryPolicy,
    recv_buffer_size: usize,
    channel_capacity: usize,
    acks: broadcast::Sender<(AckFrame, SocketAddr)>,
    listener: Mutex<Option<Listener>>,
}

impl ReliableTransport {
    /// Bind a transport to `addr`.
    pub async fn bind(addr: SocketAddr, config: &SvtpConfig) -> SvtpResult<Self> {
        let socket = SvtpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket, config))
    }

    /// Bind a transport to `port` on every IPv4 interface.
    pub async fn bind_port(port: u16, config: &SvtpConfig) -> SvtpResult<Self> {
        let socket = SvtpSocket::bind_port(port).await?;
        Ok(Self::from_socket(socket, config))
    }

    /// Wrap an already bound socket.
    pub fn from_socket(socket: SvtpSocket, config: &SvtpConfig) -> Self {
        let (acks, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            socket,
            policy: RetryPolicy::from_config(config),
            recv_buffer_size: config.recv_buffer_size,
            channel_capacity: config.channel_capacity.max(1),
            acks,
            listener: Mutex::new(None),
        }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SvtpResult<SocketAddr> {
        self.socket.local_addr()
    }

    /// The underlying socket.
    pub fn socket(&self) -> &SvtpSocket {
        &self.socket
    }

    /// The retry policy from configuration.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fire-and-forget send.
    pub async fn send_to(&self, dest: SocketAddr, bytes: &[u8]) -> SvtpResult<usize> {
        self.socket.send_to(bytes, dest).await
    }

    /// Non-blocking receive; `Ok(None)` when nothing is queued.
    ///
    /// Datagrams consumed by a concurrent [`send_with_ack`](Self::send_with_ack)
    /// wait are not seen here unless the listener is running.
    pub fn receive_from(&self, max_len: usize) -> SvtpResult<Option<(Vec<u8>, SocketAddr)>> {
        self.socket.try_recv_from(max_len)
    }

    /// Acknowledge `seq_num` to `dest`.
    pub async fn send_ack(&self, dest: SocketAddr, seq_num: u32) -> SvtpResult<()> {
        self.socket.send_to(&AckFrame::new(seq_num).encode(), dest).await?;
        trace!(%dest, seq = seq_num, "ack sent");
        Ok(())
    }

    /// [`send_with_ack`](Self::send_with_ack) using the configured retry count.
    pub async fn deliver(&self, dest: SocketAddr, bytes: &[u8], seq_num: u32) -> SvtpResult<Delivery> {
        self.send_with_ack(dest, bytes, seq_num, self.policy.max_retries)
            .await
    }

    /// Send `bytes` until an ACK for `seq_num` arrives.
    ///
    /// Makes at most `max_retries` sends. Each waits up to the ACK timeout
    /// for a datagram from `dest` whose first four bytes equal `seq_num`;
    /// ACKs for other sequence numbers or from other addresses are skipped
    /// without ending the wait. Without the listener, packets that arrive
    /// meanwhile are discarded. After a failed
    /// attempt the sender sleeps `base_backoff * 2^attempt` before resending.
    /// A failed send counts as an attempt.
    ///
    /// # Errors
    ///
    /// - [`SvtpError::InvalidArgument`] if `max_retries` is 0
    /// - [`SvtpError::Timeout`] once every attempt has gone unacknowledged
    /// - [`SvtpError::Shutdown`] if the ACK channel closed
    #[instrument(skip(self, bytes), fields(len = bytes.len()), level = "debug")]
    pub async fn send_with_ack(
        &self,
        dest: SocketAddr,
        bytes: &[u8],
        seq_num: u32,
        max_retries: u32,
    ) -> SvtpResult<Delivery> {
        if max_retries == 0 {
            return Err(SvtpError::invalid_argument("max_retries must be at least 1"));
        }

        // Subscribe before the first send so a fast ACK is not missed.
        let mut source = if self.is_listening() {
            AckSource::Listener(self.acks.subscribe())
        } else {
            AckSource::Socket
        };

        for attempt in 0..max_retries {
            let sent_at = Instant::now();
            match self.socket.send_to(bytes, dest).await {
                Ok(_) => {
                    if self.wait_for_ack(&mut source, dest, seq_num).await? {
                        let delivery = Delivery {
                            attempts: attempt + 1,
                            rtt: sent_at.elapsed(),
                        };
                        trace!(attempts = delivery.attempts, rtt = ?delivery.rtt, "delivered");
                        return Ok(delivery);
                    }
                    debug!(attempt = attempt + 1, "no ack within window");
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "send failed");
                }
            }

            if attempt + 1 < max_retries {
                sleep(self.policy.backoff(attempt)).await;
            }
        }

        warn!(attempts = max_retries, "delivery timed out");
        Err(SvtpError::Timeout {
            attempts: max_retries,
        })
    }

    /// Wait one ACK window. Returns whether the matching ACK arrived from `dest`.
    async fn wait_for_ack(
        &self,
        source: &mut AckSource,
        dest: SocketAddr,
        seq_num: u32,
    ) -> SvtpResult<bool> {
        let deadline = Instant::now() + self.policy.ack_timeout;
        let mut buf = [0u8; PACKET_HEADER_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            let ack = match source {
                AckSource::Socket => {
                    match timeout(remaining, self.socket.inner().recv_from(&mut buf)).await {
                        Err(_) => return Ok(false),
                        Ok(Ok((len, from))) if (ACK_SIZE..PACKET_HEADER_SIZE).contains(&len) => {
                            AckFrame::decode(&buf[..len]).map(|ack| (ack, from))
                        }
                        Ok(Ok((len, from))) if len >= PACKET_HEADER_SIZE => {
                            debug!(%from, "packet discarded while waiting for ack");
                            None
                        }
                        Ok(Ok((len, from))) => {
                            trace!(%from, len, "runt datagram ignored while waiting");
                            None
                        }
                        Ok(Err(e)) => {
                            debug!(error = %e, "receive failed while waiting for ack");
                            return Ok(false);
                        }
                    }
                }
                AckSource::Listener(rx) => match timeout(remaining, rx.recv()).await {
                    Err(_) => return Ok(false),
                    Ok(Ok(ack)) => Some(ack),
                    Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                        debug!(skipped, "ack receiver lagged");
                        None
                    }
                    Ok(Err(broadcast::error::RecvError::Closed)) => return Err(SvtpError::Shutdown),
                },
            };

            match ack {
                Some((ack, from)) if ack.seq_num == seq_num && from == dest => return Ok(true),
                Some((ack, from)) => {
                    trace!(%from, got = ack.seq_num, want = seq_num, "mismatched ack");
                }
                None => {}
            }
        }
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<Listener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the background listener is running.
    pub fn is_listening(&self) -> bool {
        self.listener_slot().is_some()
    }

    /// Start the background listener.
    ///
    /// Returns the channel of inbound packets. While it runs, ACKs are routed
    /// to [`send_with_ack`](Self::send_with_ack) callers.
    pub fn start_listener(&self) -> SvtpResult<mpsc::Receiver<Inbound>> {
        let mut slot = self.listener_slot();
        if slot.is_some() {
            return Err(SvtpError::invalid_argument("listener already running"));
        }

        let (packets_tx, packets_rx) = mpsc::channel(self.channel_capacity);
        *slot = Some(Listener::spawn(
            self.socket.socket_arc(),
            self.recv_buffer_size,
            packets_tx,
            self.acks.clone(),
        ));
        Ok(packets_rx)
    }

    /// Stop the listener and wait for its task to exit.
    ///
    /// Does nothing if the listener is not running.
    pub async fn stop_listener(&self) {
        let listener = self.listener_slot().take();
        if let Some(listener) = listener {
            listener.stop().await;
        }
    }
}

impl Drop for ReliableTransport {
    fn drop(&mut self) {
        if let Some(listener) = self.listener_slot().take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::UdpSocket;

    fn fast_config() -> SvtpConfig {
        SvtpConfig::builder()
            .ack_timeout(Duration::from_millis(50))
            .build()
            .unwrap()
    }

    async fn transport() -> ReliableTransport {
        ReliableTransport::bind("127.0.0.1:0".parse().unwrap(), &fast_config())
            .await
            .unwrap()
    }

    /// Peer that counts datagrams and ACKs from the `ack_on`-th one on.
    async fn acking_peer(ack_on: u32, ack_seq: u32) -> (SocketAddr, Arc<AtomicU32>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);

        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            while let Ok((_, from)) = socket.recv_from(&mut buf).await {
                let n = seen.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= ack_on {
                    let _ = socket.send_to(&AckFrame::new(ack_seq).encode(), from).await;
                }
            }
        });

        (addr, count)
    }

    #[tokio::test]
    async fn test_no_ack_makes_exactly_n_attempts() {
        let transport = transport().await;
        let (peer, count) = acking_peer(u32::MAX, 0).await;

        let result = transport.send_with_ack(peer, b"packet", 9, 3).await;
        assert!(matches!(result, Err(SvtpError::Timeout { attempts: 3 })));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ack_on_attempt_k() {
        let transport = transport().await;
        let (peer, count) = acking_peer(2, 9).await;

        let delivery = transport.send_with_ack(peer, b"packet", 9, 4).await.unwrap();
        assert_eq!(delivery.attempts, 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let transport = transport().await;
        let (peer, _) = acking_peer(1, 77).await;

        let delivery = transport.deliver(peer, b"packet", 77).await.unwrap();
        assert_eq!(delivery.attempts, 1);
        assert!(delivery.rtt < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_mismatched_ack_is_not_success() {
        let transport = transport().await;
        let (peer, count) = acking_peer(1, 8).await;

        let result = transport.send_with_ack(peer, b"packet", 9, 2).await;
        assert!(matches!(result, Err(SvtpError::Timeout { attempts: 2 })));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_retries_rejected() {
        let transport = transport().await;
        let (peer, count) = acking_peer(1, 0).await;

        assert!(matches!(
            transport.send_with_ack(peer, b"packet", 0, 0).await,
            Err(SvtpError::InvalidArgument(_))
        ));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ack_via_listener() {
        let transport = transport().await;
        let _inbound = transport.start_listener().unwrap();
        assert!(transport.is_listening());
        assert!(transport.start_listener().is_err());

        let (peer, _) = acking_peer(2, 5).await;
        let delivery = transport.send_with_ack(peer, b"packet", 5, 3).await.unwrap();
        assert_eq!(delivery.attempts, 2);

        transport.stop_listener().await;
        assert!(!transport.is_listening());
    }

    #[tokio::test]
    async fn test_listener_forwards_packets() {
        let transport = transport().await;
        let mut inbound = transport.start_listener().unwrap();
        let addr = transport.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(&[7u8; 80], addr).await.unwrap();

        let packet = tokio::time::timeout(Duration::from_secs(1), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(packet.bytes.len(), 80);
        assert_eq!(packet.from, peer.local_addr().unwrap());

        transport.stop_listener().await;
    }

    #[tokio::test]
    async fn test_send_ack_and_receive_from() {
        let a = transport().await;
        let b = transport().await;

        a.send_ack(b.local_addr().unwrap(), 0xDEAD_BEEF).await.unwrap();
        b.socket().inner().readable().await.unwrap();

        let mut received = None;
        for _ in 0..50 {
            received = b.receive_from(64).unwrap();
            if received.is_some() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        let (bytes, from) = received.unwrap();
        assert_eq!(AckFrame::decode(&bytes), Some(AckFrame::new(0xDEAD_BEEF)));
        assert_eq!(from, a.local_addr().unwrap());
    }

    /// Socket that keeps sending `ack_seq` ACKs to `target` until aborted.
    async fn stray_acker(target: SocketAddr, ack_seq: u32) -> tokio::task::JoinHandle<()> {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        tokio::spawn(async move {
            loop {
                let _ = socket.send_to(&AckFrame::new(ack_seq).encode(), target).await;
                sleep(Duration::from_millis(5)).await;
            }
        })
    }

    #[tokio::test]
    async fn test_ack_from_other_address_ignored() {
        let transport = transport().await;
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stray = stray_acker(transport.local_addr().unwrap(), 0).await;

        let result = transport
            .send_with_ack(silent.local_addr().unwrap(), b"packet", 0, 2)
            .await;
        assert!(matches!(result, Err(SvtpError::Timeout { attempts: 2 })));
        stray.abort();
    }

    #[tokio::test]
    async fn test_ack_from_other_address_ignored_via_listener() {
        let transport = transport().await;
        let _inbound = transport.start_listener().unwrap();
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stray = stray_acker(transport.local_addr().unwrap(), 0).await;

        let result = transport
            .send_with_ack(silent.local_addr().unwrap(), b"packet", 0, 2)
            .await;
        assert!(matches!(result, Err(SvtpError::Timeout { attempts: 2 })));

        stray.abort();
        transport.stop_listener().await;
    }

    #[tokio::test]
    async fn test_packet_during_wait_is_skipped() {
        let transport = transport().await;
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            if let Ok((_, from)) = peer.recv_from(&mut buf).await {
                let _ = peer.send_to(&[0xCC; PACKET_HEADER_SIZE + 16], from).await;
                let _ = peer.send_to(&AckFrame::new(3).encode(), from).await;
            }
        });

        let delivery = transport.send_with_ack(peer_addr, b"packet", 3, 2).await.unwrap();
        assert_eq!(delivery.attempts, 1);
    }
}
