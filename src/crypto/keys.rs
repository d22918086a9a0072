//! Pre-shared session secrets.
//!
//! Keys are provisioned out of band per session and never transmitted.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::{KEY_SIZE, RandomSource, SALT_SIZE, SvtpError, SvtpResult};

/// A session's SM4 key and SM3 salt.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// SM4 key (16 bytes).
    key: [u8; KEY_SIZE],
    /// Digest salt (32 bytes).
    salt: [u8; SALT_SIZE],
}

impl SessionKeys {
    /// Create from fixed-size key material.
    pub fn new(key: [u8; KEY_SIZE], salt: [u8; SALT_SIZE]) -> Self {
        Self { key, salt }
    }

    /// Create from slices, checking sizes.
    pub fn from_slices(key: &[u8], salt: &[u8]) -> SvtpResult<Self> {
        let key: [u8; KEY_SIZE] = key.try_into().map_err(|_| {
            SvtpError::invalid_argument(format!(
                "key must be {KEY_SIZE} bytes, got {}",
                key.len()
            ))
        })?;
        let salt: [u8; SALT_SIZE] = salt.try_into().map_err(|_| {
            SvtpError::invalid_argument(format!(
                "salt must be {SALT_SIZE} bytes, got {}",
                salt.len()
            ))
        })?;
        Ok(Self { key, salt })
    }

    /// Generate fresh random key material.
    pub fn generate(source: &dyn RandomSource) -> SvtpResult<Self> {
        let mut keys = Self {
            key: [0u8; KEY_SIZE],
            salt: [0u8; SALT_SIZE],
        };
        source.fill(&mut keys.key)?;
        source.fill(&mut keys.salt)?;
        Ok(keys)
    }

    /// Get the SM4 key.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Get the digest salt.
    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }
}

impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKeys { .. }")
    }
}
