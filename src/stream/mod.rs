//! SVTP Protocol - Stream Layer
//!
//! Connects the video pipeline to the packet and transport layers:
//!
//! - **Sending**: [`FrameSender`] pads, fragments, seals and delivers frames
//!   from a [`FrameSource`](crate::core::FrameSource)
//! - **Receiving**: [`FrameReceiver`] ACKs, validates, de-duplicates and
//!   reassembles packets into frames for a [`FrameSink`](crate::core::FrameSink)
//! - **Duplicates**: [`SequenceWindow`] remembers recently seen sequence numbers
//!
//! Both ends trust the sequence and fragment fields of the header, so they
//! only accept a codec built with
//! [`DigestScope::Header`](crate::core::DigestScope::Header).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   FrameSource            FrameSink      │
//! ├─────────────────────────────────────────┤
//! │         Stream Layer                    │  ← This module
//! │   pad, fragment, dedup, reassemble      │
//! ├──────────────────────┬──────────────────┤
//! │   Packet Layer       │ Transport Layer  │
//! └──────────────────────┴──────────────────┘
//! ```

mod receiver;
mod replay;
mod sender;

pub use receiver::{FrameReceiver, ReceiverStats};
pub use replay::SequenceWindow;
pub use sender::{FrameReport, FrameSender, PumpStats};
