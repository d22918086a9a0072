//! SVTP Protocol - Packet Layer
//!
//! Wire packets and the code that seals and opens them:
//!
//! - **Header**: [`PacketHeader`], the fixed 62-byte big-endian header
//! - **Codec**: [`PacketCodec`] build / parse / fragment against a registry
//! - **Reassembly**: [`Reassembler`] for multi-fragment frames
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Stream Layer                    │
//! ├─────────────────────────────────────────┤
//! │         Packet Layer                    │  ← This module
//! │   header, digest, fragments             │
//! ├──────────────────────┬──────────────────┤
//! │   Security Layer     │  Session Layer   │
//! └──────────────────────┴──────────────────┘
//! ```

mod codec;
mod fragment;
mod header;

pub use codec::{PacketCodec, ParsedPacket};
pub use fragment::Reassembler;
pub use header::{PacketHeader, peek_session_id};
