//! SM4 in cipher-block-chaining mode.
//!
//! Operates on whole blocks only. The running IV advances with every call,
//! so one context can encrypt a logical stream in several pieces; the packet
//! codec instead creates a fresh context per packet with a random IV.

use zeroize::Zeroize;

use super::sm4::Sm4;
use crate::core::{BLOCK_SIZE, CryptoError, IV_SIZE};

/// Per-call CBC context: expanded key plus running IV.
#[derive(Debug)]
pub struct Sm4Cbc {
    cipher: Sm4,
    iv: [u8; IV_SIZE],
}

impl Sm4Cbc {
    /// Set up a context from a 16-byte key and IV.
    pub fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Result<Self, CryptoError> {
        Ok(Self {
            cipher: Sm4::new(key)?,
            iv: *iv,
        })
    }

    /// The IV the next call will chain from.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Encrypt `plaintext`, which must be block-aligned.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = plaintext.to_vec();
        self.encrypt_in_place(&mut out)?;
        Ok(out)
    }

    /// Decrypt `ciphertext`, which must be block-aligned.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = ciphertext.to_vec();
        if let Err(e) = self.decrypt_in_place(&mut out) {
            out.zeroize();
            return Err(e);
        }
        Ok(out)
    }

    /// Encrypt `data` in place.
    ///
    /// Fails with [`CryptoError::InvalidLength`] before touching `data` if
    /// it is not a whole number of blocks.
    pub fn encrypt_in_place(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        check_aligned(data.len())?;

        let mut chain = self.iv;
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            for ((b, p), c) in block.iter_mut().zip(chunk.iter()).zip(chain.iter()) {
                *b = p ^ c;
            }
            self.cipher.encrypt_block(&mut block);
            chunk.copy_from_slice(&block);
            chain = block;
        }
        self.iv = chain;
        Ok(())
    }

    /// Decrypt `data` in place.
    pub fn decrypt_in_place(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        check_aligned(data.len())?;

        let mut chain = self.iv;
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            let saved = block;

            self.cipher.decrypt_block(&mut block);
            for ((out, b), c) in chunk.iter_mut().zip(block.iter()).zip(chain.iter()) {
                *out = b ^ c;
            }
            chain = saved;
        }
        self.iv = chain;
        Ok(())
    }
}

impl Drop for Sm4Cbc {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

fn check_aligned(len: usize) -> Result<(), CryptoError> {
    if len % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength(len));
    }
    Ok(())
}
