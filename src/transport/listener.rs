//! Background receive loop.
//!
//! Owns the read side of the socket while running. Datagrams long enough to
//! be packets go to the inbound channel; short ones are ACKs and go to every
//! waiting sender through the broadcast channel.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use super::ack::AckFrame;
use crate::core::{ACK_SIZE, PACKET_HEADER_SIZE};

/// A datagram large enough to hold a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Raw datagram bytes.
    pub bytes: Vec<u8>,
    /// Source address.
    pub from: SocketAddr,
}

/// Running listener task.
#[derive(Debug)]
pub(crate) struct Listener {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Listener {
    pub(crate) fn spawn(
        socket: Arc<UdpSocket>,
        buffer_size: usize,
        packets: mpsc::Sender<Inbound>,
        acks: broadcast::Sender<(AckFrame, SocketAddr)>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(listen(socket, buffer_size, packets, acks, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// Signal the loop and wait for it to exit.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }

    /// Signal the loop and abort it without waiting.
    pub(crate) fn abort(self) {
        let _ = self.shutdown_tx.send(true);
        self.task.abort();
    }
}

async fn listen(
    socket: Arc<UdpSocket>,
    buffer_size: usize,
    packets: mpsc::Sender<Inbound>,
    acks: broadcast::Sender<(AckFrame, SocketAddr)>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; buffer_size];
    debug!(local = ?socket.local_addr().ok(), "listener started");

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, from)) => dispatch(&buf[..len], from, &packets, &acks),
                Err(e) if is_transient(&e) => {
                    debug!(error = %e, "transient receive error");
                }
                Err(e) => {
                    error!(error = %e, "listener receive failed");
                    break;
                }
            },
        }
    }

    debug!("listener stopped");
}

fn dispatch(
    datagram: &[u8],
    from: SocketAddr,
    packets: &mpsc::Sender<Inbound>,
    acks: &broadcast::Sender<(AckFrame, SocketAddr)>,
) {
    if datagram.len() >= PACKET_HEADER_SIZE {
        let inbound = Inbound {
            bytes: datagram.to_vec(),
            from,
        };
        if let Err(e) = packets.try_send(inbound) {
            trace!(%from, error = %e, "inbound packet dropped");
        }
    } else if let Some(ack) = AckFrame::decode(datagram) {
        trace!(%from, seq = ack.seq_num, "ack received");
        // No subscribers just means nobody is waiting.
        let _ = acks.send((ack, from));
    } else {
        trace!(%from, len = datagram.len(), min = ACK_SIZE, "runt datagram ignored");
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}
