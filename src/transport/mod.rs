//! SVTP Protocol - Transport Layer
//!
//! This module moves sealed packets over UDP. It provides:
//!
//! - **Async sockets**: [`SvtpSocket`] wrapper for tokio UDP
//! - **Acknowledgments**: [`AckFrame`] and the [`RetryPolicy`] backoff
//! - **Reliable delivery**: [`ReliableTransport::send_with_ack`]
//! - **Listener**: a cancellable receive task yielding [`Inbound`] packets
//!
//! # Architecture
//!
//! The transport never looks inside a packet. It only distinguishes
//! datagrams by length: at least a header's worth is a packet, four bytes or
//! more below that is an ACK.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Stream Layer                    │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   send, ACK wait, retry, listener       │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```

mod ack;
mod listener;
mod reliable;
mod socket;

pub use ack::{AckFrame, RetryPolicy};
pub use listener::Inbound;
pub use reliable::{Delivery, ReliableTransport};
pub use socket::SvtpSocket;
