//! Acknowledgment frames and retry policy.

use std::time::Duration;

use crate::core::{ACK_SIZE, MAX_BACKOFF_SHIFT, SvtpConfig};

/// Application-level acknowledgment.
///
/// Wire format: the acknowledged sequence number, 4 bytes big-endian. Any
/// trailing bytes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AckFrame {
    /// Acknowledged sequence number.
    pub seq_num: u32,
}

impl AckFrame {
    /// Create an ACK for `seq_num`.
    pub const fn new(seq_num: u32) -> Self {
        Self { seq_num }
    }

    /// Encode to wire format.
    pub fn encode(&self) -> [u8; ACK_SIZE] {
        self.seq_num.to_be_bytes()
    }

    /// Decode from a datagram, or `None` if it is shorter than 4 bytes.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let bytes: [u8; ACK_SIZE] = data.get(..ACK_SIZE)?.try_into().ok()?;
        Some(Self::new(u32::from_be_bytes(bytes)))
    }
}

/// Delivery budget for [`send_with_ack`](super::ReliableTransport::send_with_ack).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Send attempts before giving up.
    pub max_retries: u32,
    /// How long each attempt waits for its ACK.
    pub ack_timeout: Duration,
    /// Backoff unit.
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Take the delivery settings from `config`.
    pub fn from_config(config: &SvtpConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            ack_timeout: config.ack_timeout,
            base_backoff: config.base_backoff,
        }
    }

    /// Pause after failed attempt `attempt` (0-based): `base * 2^attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_SHIFT))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SvtpConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_wire_format() {
        let ack = AckFrame::new(0x0102_0304);
        assert_eq!(ack.encode(), [1, 2, 3, 4]);
        assert_eq!(AckFrame::decode(&[1, 2, 3, 4]), Some(ack));
        assert_eq!(AckFrame::decode(&[1, 2, 3, 4, 0xFF, 0xFF]), Some(ack));
        assert_eq!(AckFrame::decode(&[1, 2, 3]), None);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1));
        assert_eq!(policy.backoff(1), Duration::from_millis(2));
        assert_eq!(policy.backoff(2), Duration::from_millis(4));
        assert_eq!(policy.backoff(100), Duration::from_millis(1 << MAX_BACKOFF_SHIFT));
    }

    #[test]
    fn test_policy_from_config() {
        let config = SvtpConfig::builder()
            .max_retries(5)
            .ack_timeout(Duration::from_millis(20))
            .build()
            .unwrap();
        let policy = RetryPolicy::from_config(&config);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.ack_timeout, Duration::from_millis(20));
    }
}
