//! Fixed 62-byte packet header.

use crate::core::{
    DIGEST_SIZE, HEADER_FIELDS_SIZE, IV_SIZE, PACKET_HEADER_SIZE, SESSION_ID_SIZE, SessionId,
    SvtpError, SvtpResult,
};

const IV_OFFSET: usize = HEADER_FIELDS_SIZE;
const DIGEST_OFFSET: usize = IV_OFFSET + IV_SIZE;

/// Packet header.
///
/// Wire format (all integers big-endian):
/// ```text
/// +0   session_id       (4 bytes)
/// +4   seq_num          (4 bytes)
/// +8   fragment_id      (2 bytes)
/// +10  total_fragments  (2 bytes)
/// +12  payload_len      (2 bytes)
/// +14  iv               (16 bytes, cleartext)
/// +30  sm3_digest       (32 bytes)
/// +62  ciphertext       (payload_len bytes)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Owning session.
    pub session_id: SessionId,
    /// Per-session sequence number.
    pub seq_num: u32,
    /// Index of this fragment within its frame.
    pub fragment_id: u16,
    /// Fragments in the frame; 0 or 1 means unfragmented.
    pub total_fragments: u16,
    /// Ciphertext length following the header.
    pub payload_len: u16,
    /// CBC initialization vector.
    pub iv: [u8; IV_SIZE],
    /// SM3 integrity digest.
    pub digest: [u8; DIGEST_SIZE],
}

impl PacketHeader {
    /// The 14 integer-field bytes preceding the IV.
    pub fn field_bytes(&self) -> [u8; HEADER_FIELDS_SIZE] {
        let mut out = [0u8; HEADER_FIELDS_SIZE];
        out[0..4].copy_from_slice(&self.session_id.to_be_bytes());
        out[4..8].copy_from_slice(&self.seq_num.to_be_bytes());
        out[8..10].copy_from_slice(&self.fragment_id.to_be_bytes());
        out[10..12].copy_from_slice(&self.total_fragments.to_be_bytes());
        out[12..14].copy_from_slice(&self.payload_len.to_be_bytes());
        out
    }

    /// Encode to wire format.
    pub fn to_bytes(&self) -> [u8; PACKET_HEADER_SIZE] {
        let mut out = [0u8; PACKET_HEADER_SIZE];
        out[..IV_OFFSET].copy_from_slice(&self.field_bytes());
        out[IV_OFFSET..DIGEST_OFFSET].copy_from_slice(&self.iv);
        out[DIGEST_OFFSET..].copy_from_slice(&self.digest);
        out
    }

    /// Decode from the front of `data`.
    ///
    /// Fails with [`SvtpError::Truncated`] if fewer than 62 bytes are given.
    /// Trailing bytes are ignored.
    pub fn from_bytes(data: &[u8]) -> SvtpResult<Self> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(SvtpError::Truncated {
                expected: PACKET_HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&data[IV_OFFSET..DIGEST_OFFSET]);
        let mut digest = [0u8; DIGEST_SIZE];
        digest.copy_from_slice(&data[DIGEST_OFFSET..PACKET_HEADER_SIZE]);

        Ok(Self {
            session_id: SessionId::from_be_bytes([data[0], data[1], data[2], data[3]]),
            seq_num: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            fragment_id: u16::from_be_bytes([data[8], data[9]]),
            total_fragments: u16::from_be_bytes([data[10], data[11]]),
            payload_len: u16::from_be_bytes([data[12], data[13]]),
            iv,
            digest,
        })
    }

    /// Whether this packet is one part of a larger frame.
    pub fn is_fragmented(&self) -> bool {
        self.total_fragments > 1
    }

    /// Full datagram size declared by this header.
    pub fn packet_len(&self) -> usize {
        PACKET_HEADER_SIZE + usize::from(self.payload_len)
    }
}

/// Read the session identifier without decoding the rest of the header.
pub fn peek_session_id(data: &[u8]) -> Option<SessionId> {
    let bytes: [u8; SESSION_ID_SIZE] = data.get(..SESSION_ID_SIZE)?.try_into().ok()?;
    Some(SessionId::from_be_bytes(bytes))
}
