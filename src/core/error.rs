//! Error types for SVTP.
//!
//! Every layer reports failure through [`SvtpError`], so build, parse and
//! delivery share one vocabulary.

use std::io;

use thiserror::Error;

use super::SessionId;

/// Errors raised by the cryptographic primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material has the wrong size.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Input is not a whole number of cipher blocks.
    #[error("invalid length: {0} bytes is not a multiple of the block size")]
    InvalidLength(usize),

    /// PKCS#7 padding is malformed.
    #[error("invalid padding")]
    InvalidPadding,
}

/// The random byte source could not produce output.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("random source unavailable: {0}")]
pub struct RandomSourceError(pub String);

/// Top-level SVTP errors.
#[derive(Debug, Error)]
pub enum SvtpError {
    /// Malformed caller input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Session is missing or has expired.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// Entropy unavailable.
    #[error(transparent)]
    RandomSource(#[from] RandomSourceError),

    /// Datagram shorter than the fixed header.
    #[error("truncated packet: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum size.
        expected: usize,
        /// Received size.
        actual: usize,
    },

    /// Datagram size disagrees with the declared payload length.
    #[error("length mismatch: header declares {expected} bytes, packet has {actual}")]
    LengthMismatch {
        /// Size implied by the header.
        expected: usize,
        /// Received size.
        actual: usize,
    },

    /// Fragment fields are inconsistent (index out of range or totals disagree).
    #[error("invalid fragment {fragment_id} of {total_fragments}")]
    InvalidFragment {
        /// Fragment index from the header.
        fragment_id: u16,
        /// Fragment count from the header.
        total_fragments: u16,
    },

    /// Digest mismatch (corruption or tampering, deliberately not distinguished).
    #[error("integrity check failed")]
    IntegrityFailure,

    /// Cryptographic primitive failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Session sequence space is used up.
    #[error("sequence numbers exhausted for session {0}")]
    SequenceExhausted(SessionId),

    /// OS-level transport failure.
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    /// No matching ACK within the retry budget.
    #[error("no acknowledgment after {attempts} attempts")]
    Timeout {
        /// Send attempts made.
        attempts: u32,
    },

    /// Configuration rejected.
    #[error("configuration error: {0}")]
    Config(String),

    /// A background task or channel has shut down.
    #[error("shut down")]
    Shutdown,
}

impl SvtpError {
    /// Build an [`SvtpError::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Errors describing malformed or forged wire data.
    pub fn is_wire_error(&self) -> bool {
        matches!(
            self,
            SvtpError::Truncated { .. }
                | SvtpError::LengthMismatch { .. }
                | SvtpError::InvalidFragment { .. }
                | SvtpError::IntegrityFailure
        )
    }

    /// Check if this error should result in a silent drop on receive.
    ///
    /// The payload consumer never learns about these; they are only logged.
    pub fn is_silent_drop(&self) -> bool {
        self.is_wire_error()
            || matches!(
                self,
                SvtpError::SessionNotFound(_) | SvtpError::Crypto(CryptoError::InvalidLength(_))
            )
    }

    /// Check if this error ends the session rather than a single frame.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SvtpError::SessionNotFound(_) | SvtpError::SequenceExhausted(_) | SvtpError::Shutdown
        )
    }
}

/// Result type for SVTP operations.
pub type SvtpResult<T> = Result<T, SvtpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_drop_errors() {
        assert!(SvtpError::IntegrityFailure.is_silent_drop());
        assert!(SvtpError::Truncated { expected: 62, actual: 3 }.is_silent_drop());
        assert!(SvtpError::LengthMismatch { expected: 78, actual: 79 }.is_silent_drop());
        assert!(SvtpError::SessionNotFound(SessionId::new(7)).is_silent_drop());
        assert!(SvtpError::InvalidFragment { fragment_id: 3, total_fragments: 2 }.is_silent_drop());

        assert!(!SvtpError::Timeout { attempts: 3 }.is_silent_drop());
        assert!(!SvtpError::invalid_argument("empty payload").is_silent_drop());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(SvtpError::SessionNotFound(SessionId::new(1)).is_fatal());
        assert!(SvtpError::SequenceExhausted(SessionId::new(1)).is_fatal());
        assert!(SvtpError::Shutdown.is_fatal());

        assert!(!SvtpError::IntegrityFailure.is_fatal());
        assert!(!SvtpError::Timeout { attempts: 1 }.is_fatal());
    }

    #[test]
    fn test_conversions() {
        let err: SvtpError = CryptoError::InvalidLength(10).into();
        assert!(matches!(err, SvtpError::Crypto(CryptoError::InvalidLength(10))));

        let err: SvtpError = RandomSourceError("no entropy".into()).into();
        assert!(matches!(err, SvtpError::RandomSource(_)));

        let err: SvtpError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, SvtpError::Socket(_)));
    }
}
