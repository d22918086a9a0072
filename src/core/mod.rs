//! SVTP core: constants, errors, configuration and boundary traits.
//!
//! Always included; every other layer builds on these types.

mod config;
mod constants;
mod error;
mod ids;
mod traits;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use ids::SessionId;
pub use traits::*;
