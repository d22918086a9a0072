//! Async UDP socket wrapper for SVTP transport.
//!
//! Thin layer over tokio's non-blocking UDP socket. The socket is shared by
//! `Arc`, so the sender path and the listener task can use it at once.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::core::SvtpResult;

/// Non-blocking datagram socket.
#[derive(Debug, Clone)]
pub struct SvtpSocket {
    socket: Arc<UdpSocket>,
}

impl SvtpSocket {
    /// Bind to the given address.
    pub async fn bind(addr: SocketAddr) -> SvtpResult<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Bind to `port` on every IPv4 interface. Port 0 picks a free port.
    pub async fn bind_port(port: u16) -> SvtpResult<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await
    }

    /// Wrap an existing tokio socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
        }
    }

    /// Get the local address.
    pub fn local_addr(&self) -> SvtpResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Fire-and-forget send. Returns the number of bytes sent.
    pub async fn send_to(&self, data: &[u8], dest: SocketAddr) -> SvtpResult<usize> {
        Ok(self.socket.send_to(data, dest).await?)
    }

    /// Receive one datagram of at most `max_len` bytes without waiting.
    ///
    /// Returns `Ok(None)` if nothing is queued. Longer datagrams are
    /// truncated to `max_len`.
    pub fn try_recv_from(&self, max_len: usize) -> SvtpResult<Option<(Vec<u8>, SocketAddr)>> {
        let mut buf = vec![0u8; max_len];
        match self.socket.try_recv_from(&mut buf) {
            Ok((len, from)) => {
                buf.truncate(len);
                Ok(Some((buf, from)))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait for one datagram of at most `max_len` bytes.
    pub async fn recv_from(&self, max_len: usize) -> SvtpResult<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; max_len];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(len);
        Ok((buf, from))
    }

    /// Get a reference to the underlying socket.
    pub fn inner(&self) -> &UdpSocket {
        &self.socket
    }

    pub(crate) fn socket_arc(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn loopback() -> SvtpSocket {
        SvtpSocket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_socket_bind() {
        let socket = loopback().await;
        assert_ne!(socket.local_addr().unwrap().port(), 0);

        let any = SvtpSocket::bind_port(0).await.unwrap();
        assert!(any.local_addr().unwrap().ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_socket_send_recv() {
        let server = loopback().await;
        let client = loopback().await;

        let sent = client
            .send_to(b"hello SVTP", server.local_addr().unwrap())
            .await
            .unwrap();
        assert_eq!(sent, 10);

        let (data, from) = server.recv_from(1500).await.unwrap();
        assert_eq!(data, b"hello SVTP");
        assert_eq!(from, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_try_recv_would_block() {
        let socket = loopback().await;
        assert!(socket.try_recv_from(1500).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_try_recv_ready() {
        let server = loopback().await;
        let client = loopback().await;
        client
            .send_to(&[1, 2, 3, 4], server.local_addr().unwrap())
            .await
            .unwrap();

        server.inner().readable().await.unwrap();
        let mut received = None;
        for _ in 0..50 {
            received = server.try_recv_from(1500).unwrap();
            if received.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let (data, _) = received.unwrap();
        assert_eq!(data, [1, 2, 3, 4]);
    }
}
