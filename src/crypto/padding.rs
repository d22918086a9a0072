//! PKCS#7 padding to the SM4 block size.
//!
//! The packet codec only accepts block-aligned payloads; frame producers use
//! these helpers to get there and back.

use crate::core::{BLOCK_SIZE, CryptoError};

/// Pad `data` to a multiple of the block size.
///
/// Always adds between 1 and 16 bytes, so aligned input grows by a full block.
pub fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.resize(data.len() + pad, pad as u8);
    out
}

/// Strip PKCS#7 padding, returning the original bytes.
pub fn pkcs7_unpad(data: &[u8]) -> Result<&[u8], CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength(data.len()));
    }

    let pad = data[data.len() - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(CryptoError::InvalidPadding);
    }
    let (body, tail) = data.split_at(data.len() - pad);
    if tail.iter().any(|&b| b as usize != pad) {
        return Err(CryptoError::InvalidPadding);
    }
    Ok(body)
}
