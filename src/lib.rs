//! # SVTP Protocol
//!
//! **S**ecure **V**ideo **T**ransport **P**rotocol
//!
//! SVTP carries encoded video frames between two peers over UDP. Every
//! packet is encrypted with SM4-CBC under a fresh IV and authenticated with
//! a salted SM3 digest. It provides:
//!
//! - **Confidentiality**: SM4-CBC with a per-packet random IV
//! - **Integrity**: salted SM3 digest, checked before any decryption
//! - **Sessions**: random identifiers, monotonic sequence numbers, liveness
//! - **Reliability**: per-packet ACK with exponential backoff
//! - **Fragmentation**: frames larger than one datagram are split and rejoined
//!
//! ## Feature Flags
//!
//! - `transport` (default): UDP transport, listener, sweeper and stream layer
//!
//! ## Modules
//!
//! - [`core`]: Constants, errors, configuration and boundary traits
//! - [`crypto`]: SM3, SM4, CBC mode, padding and IV generation
//! - [`session`]: Session registry and per-session bookkeeping
//! - [`packet`]: Wire header, packet codec and reassembly
//! - [`transport`]: UDP delivery with ACK and retry (requires `transport`)
//! - [`stream`]: Frame sender and receiver (requires `transport`)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use svtp_protocol::prelude::*;
//!
//! let config = SvtpConfig::default();
//! let registry = Arc::new(SessionRegistry::new(&config));
//! let codec = PacketCodec::new(Arc::clone(&registry), &config);
//!
//! let session = registry.create_session("127.0.0.1:9000".parse().unwrap());
//! let keys = SessionKeys::new([0x01; 16], [0x02; 32]);
//!
//! let wire = codec
//!     .build(session, &pkcs7_pad(b"FRAME-0001"), keys.key(), keys.salt())
//!     .unwrap();
//! assert_eq!(wire.len(), PACKET_HEADER_SIZE + 16);
//!
//! let parsed = codec.parse(&wire, keys.key(), keys.salt()).unwrap();
//! assert_eq!(parsed.header.session_id, session);
//! assert_eq!(pkcs7_unpad(&parsed.payload).unwrap(), b"FRAME-0001");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Security layer
pub mod crypto;

// Session layer
pub mod session;

// Packet layer
pub mod packet;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Stream layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod stream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::crypto::{SessionKeys, pkcs7_pad, pkcs7_unpad};
    pub use crate::packet::{PacketCodec, PacketHeader, ParsedPacket, Reassembler};
    pub use crate::session::{SessionHandle, SessionRegistry, SessionSnapshot};

    #[cfg(feature = "transport")]
    pub use crate::session::SessionSweeper;

    #[cfg(feature = "transport")]
    pub use crate::transport::{AckFrame, Delivery, Inbound, ReliableTransport, RetryPolicy};

    #[cfg(feature = "transport")]
    pub use crate::stream::{FrameReceiver, FrameSender, ReceiverStats};
}

// Re-export commonly used items at crate root
pub use crate::core::{SessionId, SvtpConfig, SvtpError, SvtpResult};
pub use crate::packet::PacketCodec;
pub use crate::session::SessionRegistry;

#[cfg(feature = "transport")]
pub use crate::transport::ReliableTransport;
