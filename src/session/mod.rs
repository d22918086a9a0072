//! SVTP Protocol - Session Layer
//!
//! Per-peer session bookkeeping shared by the packet codec and the stream
//! layer:
//!
//! - **Registry**: [`SessionRegistry`], identifiers, liveness, sequencing
//! - **Handles**: [`SessionHandle`] values and [`SessionSnapshot`] copies
//! - **RTT estimation**: [`RttEstimator`] implementing RFC 6298
//! - **Expiry**: [`SessionSweeper`] background task (requires `transport`)
//!
//! # Liveness
//!
//! A session is live while its idle time stays within the registry's
//! liveness timeout. Lookups that find an expired session remove it, and the
//! sweeper removes the rest with the same timeout.

mod registry;
#[allow(clippy::module_inception)]
mod session;
#[cfg(feature = "transport")]
mod sweeper;
mod timing;

pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionSnapshot};
#[cfg(feature = "transport")]
pub use sweeper::SessionSweeper;
pub use timing::RttEstimator;
