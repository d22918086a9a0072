//! Boundary capabilities for SVTP.
//!
//! These traits are the only contract between the transport core and the
//! outside world: an entropy source, and the video pipeline on either end.
//! None of them carry knowledge of encryption, sessions or fragmentation.

use super::error::RandomSourceError;

/// A secure source of random bytes.
///
/// Used to draw a fresh IV for every packet.
pub trait RandomSource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<(), RandomSourceError>;
}

/// Producer of encoded frames (the encoder side of the video pipeline).
///
/// # Example
///
/// ```
/// use svtp_protocol::core::FrameSource;
///
/// struct Canned(Vec<Vec<u8>>);
///
/// impl FrameSource for Canned {
///     fn next_frame(&mut self) -> Option<Vec<u8>> {
///         if self.0.is_empty() { None } else { Some(self.0.remove(0)) }
///     }
/// }
///
/// let mut source = Canned(vec![b"FRAME-0001".to_vec()]);
/// assert_eq!(source.next_frame().as_deref(), Some(&b"FRAME-0001"[..]));
/// assert!(source.next_frame().is_none());
/// ```
pub trait FrameSource: Send {
    /// Next encoded frame, or `None` when the stream has ended.
    fn next_frame(&mut self) -> Option<Vec<u8>>;
}

/// Consumer of decrypted frames (the decoder/renderer side).
pub trait FrameSink: Send {
    /// Accept one complete, decrypted frame.
    fn deliver(&mut self, frame: &[u8]);
}

impl<F> FrameSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn deliver(&mut self, frame: &[u8]) {
        self(frame)
    }
}
