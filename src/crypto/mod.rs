//! SVTP Protocol - Security Layer
//!
//! This module implements the cryptographic primitives used by every packet:
//!
//! - **Hash**: [`Sm3`], the 256-bit SM3 digest (GB/T 32905-2016)
//! - **Block cipher**: [`Sm4`], the 128-bit SM4 cipher (GB/T 32907-2016)
//! - **Mode**: [`Sm4Cbc`], SM4 in cipher-block-chaining mode
//! - **Padding**: [`pkcs7_pad`] / [`pkcs7_unpad`] for frame producers
//! - **Entropy**: [`OsRandom`] and [`generate_iv`]
//! - **Secrets**: [`SessionKeys`], the pre-shared key and salt for one session
//!
//! # Architecture
//!
//! Primitive contexts are plain values owned by the call that creates them.
//! There is no global cryptographic state. Anything holding key material
//! zeroizes it on drop.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Packet Layer                    │
//! │   build / parse / fragments             │
//! ├─────────────────────────────────────────┤
//! │         Security Layer                  │  ← This module
//! │   SM3 digest, SM4-CBC, IV source        │
//! └─────────────────────────────────────────┘
//! ```

mod cbc;
mod keys;
mod padding;
mod random;
mod sm3;
mod sm4;

pub use cbc::Sm4Cbc;
pub use keys::SessionKeys;
pub use padding::{pkcs7_pad, pkcs7_unpad};
pub use random::{OsRandom, generate_iv};
pub use sm3::Sm3;
pub use sm4::Sm4;
