//! Session identifier.

use std::fmt;

/// Process-unique 32-bit session identifier.
///
/// Carried big-endian in the first four bytes of every packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u32);

impl SessionId {
    /// Create a session ID from its numeric value.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the numeric value.
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Wire encoding (network byte order).
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Decode from wire bytes (network byte order).
    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<SessionId> for u32 {
    fn from(id: SessionId) -> u32 {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_wire_order() {
        let id = SessionId::new(0x0102_0304);
        assert_eq!(id.to_be_bytes(), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(SessionId::from_be_bytes([0x01, 0x02, 0x03, 0x04]), id);
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::new(0xbeef);
        assert_eq!(format!("{}", id), "0000beef");
    }
}
