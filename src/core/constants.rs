//! Protocol constants for SVTP.
//!
//! Wire sizes are fixed by the packet format and MUST NOT be changed.
//! Timing values are defaults; [`SvtpConfig`](super::SvtpConfig) overrides them.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// SM4 key size (128-bit).
pub const KEY_SIZE: usize = 16;

/// SM4 block size (128-bit).
pub const BLOCK_SIZE: usize = 16;

/// CBC initialization vector size (one block).
pub const IV_SIZE: usize = 16;

/// SM3 digest size (256-bit).
pub const DIGEST_SIZE: usize = 32;

/// Shared salt size mixed into the integrity digest (256-bit).
pub const SALT_SIZE: usize = 32;

/// Number of SM4 rounds.
pub const SM4_ROUNDS: usize = 32;

// =============================================================================
// PACKET WIRE FORMAT
// =============================================================================

/// Session identifier field size.
pub const SESSION_ID_SIZE: usize = 4;

/// Sequence number field size.
pub const SEQ_NUM_SIZE: usize = 4;

/// Fragment index field size.
pub const FRAGMENT_ID_SIZE: usize = 2;

/// Total fragment count field size.
pub const TOTAL_FRAGMENTS_SIZE: usize = 2;

/// Payload length field size.
pub const PAYLOAD_LEN_SIZE: usize = 2;

/// Size of the integer fields that precede the IV.
pub const HEADER_FIELDS_SIZE: usize =
    SESSION_ID_SIZE + SEQ_NUM_SIZE + FRAGMENT_ID_SIZE + TOTAL_FRAGMENTS_SIZE + PAYLOAD_LEN_SIZE;

/// Fixed packet header size (fields + IV + digest).
pub const PACKET_HEADER_SIZE: usize = HEADER_FIELDS_SIZE + IV_SIZE + DIGEST_SIZE;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Largest block-aligned payload that fits the length field.
pub const MAX_ALIGNED_PAYLOAD_LEN: usize = MAX_PAYLOAD_LEN - (MAX_PAYLOAD_LEN % BLOCK_SIZE);

/// Minimum ACK datagram size (acknowledged sequence number, big-endian).
pub const ACK_SIZE: usize = 4;

/// Default fragment payload (fits a 1500-byte MTU with headers to spare).
pub const DEFAULT_MAX_FRAGMENT_PAYLOAD: usize = 1200;

/// Default receive buffer size.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

// =============================================================================
// SESSION CONSTANTS
// =============================================================================

/// Initial congestion window.
pub const INITIAL_CONGESTION_WINDOW: u32 = 1;

/// Minimum congestion window.
pub const MIN_CONGESTION_WINDOW: u32 = 1;

/// Maximum congestion window.
pub const MAX_CONGESTION_WINDOW: u32 = 65535;

/// Sessions idle longer than this are expired.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between background sweeps of expired sessions.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// RTT ESTIMATION (RFC 6298)
// =============================================================================

/// Retransmission timeout before the first RTT sample.
pub const INITIAL_RTO: Duration = Duration::from_secs(1);

/// Lower bound on the computed retransmission timeout.
pub const MIN_RTO: Duration = Duration::from_millis(200);

/// Upper bound on the computed retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_secs(60);

/// Clock granularity term `G` in the RTO formula.
pub const RTO_GRANULARITY: Duration = Duration::from_millis(1);

// =============================================================================
// DELIVERY CONSTANTS
// =============================================================================

/// Window to wait for a matching ACK per attempt.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Backoff unit; attempt `n` sleeps `BASE_BACKOFF * 2^n`.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(1);

/// Default number of send attempts for acknowledged delivery.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on the backoff exponent.
pub const MAX_BACKOFF_SHIFT: u32 = 16;

/// Capacity of the listener's inbound packet channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// REASSEMBLY CONSTANTS
// =============================================================================

/// Incomplete frames older than this are discarded.
pub const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum frames held in reassembly at once.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 64;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_matches_wire_format() {
        assert_eq!(HEADER_FIELDS_SIZE, 14);
        assert_eq!(PACKET_HEADER_SIZE, 62);
    }

    #[test]
    fn test_aligned_limits() {
        assert_eq!(MAX_ALIGNED_PAYLOAD_LEN % BLOCK_SIZE, 0);
        assert!(MAX_ALIGNED_PAYLOAD_LEN <= MAX_PAYLOAD_LEN);
        assert_eq!(DEFAULT_MAX_FRAGMENT_PAYLOAD % BLOCK_SIZE, 0);
    }
}
