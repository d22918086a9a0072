//! Operating-system random source.

use rand::{RngCore, rngs::OsRng};

use crate::core::{IV_SIZE, RandomSource, RandomSourceError};

/// [`RandomSource`] backed by the operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&self, buf: &mut [u8]) -> Result<(), RandomSourceError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| RandomSourceError(e.to_string()))
    }
}

/// Draw a fresh CBC IV from `source`.
pub fn generate_iv(source: &dyn RandomSource) -> Result<[u8; IV_SIZE], RandomSourceError> {
    let mut iv = [0u8; IV_SIZE];
    source.fill(&mut iv)?;
    Ok(iv)
}
