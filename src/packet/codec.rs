//! Packet build and parse.
//!
//! The only place frame bytes meet key material. Build encrypts under a
//! fresh random IV, digests and serializes; parse validates length and
//! digest before any decryption happens, so a forged packet never yields
//! plaintext.

use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::trace;

use super::header::PacketHeader;
use crate::core::{
    BLOCK_SIZE, CryptoError, DIGEST_SIZE, DigestScope, KEY_SIZE, MAX_ALIGNED_PAYLOAD_LEN,
    PACKET_HEADER_SIZE, RandomSource, SALT_SIZE, SessionId, SvtpConfig, SvtpError, SvtpResult,
};
use crate::crypto::{OsRandom, Sm3, Sm4Cbc, generate_iv};
use crate::session::{SessionHandle, SessionRegistry};

/// A successfully parsed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    /// Decoded header.
    pub header: PacketHeader,
    /// Decrypted payload.
    pub payload: Vec<u8>,
}

/// Builds and parses SVTP packets against a shared session registry.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use svtp_protocol::core::SvtpConfig;
/// use svtp_protocol::crypto::pkcs7_pad;
/// use svtp_protocol::packet::PacketCodec;
/// use svtp_protocol::session::SessionRegistry;
///
/// let registry = Arc::new(SessionRegistry::default());
/// let codec = PacketCodec::new(Arc::clone(&registry), &SvtpConfig::default());
/// let session = registry.create_session("127.0.0.1:5000".parse().unwrap());
///
/// let (key, salt) = ([7u8; 16], [9u8; 32]);
/// let payload = pkcs7_pad(b"FRAME-0001");
/// let wire = codec.build(session, &payload, &key, &salt).unwrap();
///
/// let parsed = codec.parse(&wire, &key, &salt).unwrap();
/// assert_eq!(parsed.header.seq_num, 0);
/// assert_eq!(parsed.payload, payload);
/// ```
pub struct PacketCodec {
    registry: Arc<SessionRegistry>,
    random: Arc<dyn RandomSource>,
    digest_scope: DigestScope,
    max_fragment_payload: usize,
}

impl PacketCodec {
    /// Create a codec drawing IVs from the operating system.
    pub fn new(registry: Arc<SessionRegistry>, config: &SvtpConfig) -> Self {
        Self::with_random_source(registry, config, Arc::new(OsRandom))
    }

    /// Create a codec with a caller-supplied random source.
    pub fn with_random_source(
        registry: Arc<SessionRegistry>,
        config: &SvtpConfig,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            registry,
            random,
            digest_scope: config.digest_scope,
            max_fragment_payload: config.max_fragment_payload,
        }
    }

    /// The registry this codec sequences against.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Largest ciphertext carried by one fragment.
    pub fn max_fragment_payload(&self) -> usize {
        self.max_fragment_payload
    }

    /// Which bytes the digest covers.
    pub fn digest_scope(&self) -> DigestScope {
        self.digest_scope
    }

    /// Encrypt and serialize one packet.
    ///
    /// `payload` must be non-empty, block-aligned and at most 65535 bytes.
    /// Consumes one sequence number from the session on success.
    ///
    /// # Errors
    ///
    /// - [`SvtpError::InvalidArgument`] for an empty or oversized payload, a
    ///   key that is not 16 bytes or a salt that is not 32 bytes
    /// - [`SvtpError::SessionNotFound`] if the session is absent or expired
    /// - [`SvtpError::RandomSource`] if no IV could be drawn
    /// - [`SvtpError::Crypto`] if the payload is not block-aligned
    pub fn build(
        &self,
        session_id: SessionId,
        payload: &[u8],
        key: &[u8],
        salt: &[u8],
    ) -> SvtpResult<Vec<u8>> {
        check_secrets(key, salt)?;
        if payload.is_empty() {
            return Err(SvtpError::invalid_argument("payload must not be empty"));
        }
        let payload_len = u16::try_from(payload.len()).map_err(|_| {
            SvtpError::invalid_argument(format!(
                "payload of {} bytes exceeds the 16-bit length field",
                payload.len()
            ))
        })?;

        let handle = self.lookup(session_id)?;
        let (iv, ciphertext) = self.encrypt(key, payload)?;
        let seq_num = self.registry.next_sequence(&handle)?;

        let header = PacketHeader {
            session_id,
            seq_num,
            fragment_id: 0,
            total_fragments: 1,
            payload_len,
            iv,
            digest: [0u8; DIGEST_SIZE],
        };
        trace!(session = %session_id, seq = seq_num, len = payload.len(), "built packet");
        Ok(self.seal(header, &ciphertext, salt))
    }

    /// Encrypt `payload` as a run of fragment packets.
    ///
    /// Each fragment carries at most `max_fragment_payload` ciphertext bytes,
    /// its own IV and digest, and a consecutive sequence number. A payload
    /// that fits one fragment produces exactly what [`build`](Self::build)
    /// would.
    pub fn build_fragments(
        &self,
        session_id: SessionId,
        payload: &[u8],
        key: &[u8],
        salt: &[u8],
    ) -> SvtpResult<Vec<Vec<u8>>> {
        check_secrets(key, salt)?;
        if payload.is_empty() {
            return Err(SvtpError::invalid_argument("payload must not be empty"));
        }
        if payload.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidLength(payload.len()).into());
        }

        let chunk_size = self.max_fragment_payload;
        if chunk_size == 0 || chunk_size % BLOCK_SIZE != 0 || chunk_size > MAX_ALIGNED_PAYLOAD_LEN {
            return Err(SvtpError::Config(format!(
                "max_fragment_payload {chunk_size} is not a usable fragment size"
            )));
        }

        let chunks: Vec<&[u8]> = payload.chunks(chunk_size).collect();
        let total_fragments = u16::try_from(chunks.len()).map_err(|_| {
            SvtpError::invalid_argument(format!(
                "payload of {} bytes needs more than {} fragments",
                payload.len(),
                u16::MAX
            ))
        })?;

        let handle = self.lookup(session_id)?;
        let mut sealed = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            sealed.push(self.encrypt(key, chunk)?);
        }
        let first_seq = self
            .registry
            .reserve_sequences(&handle, u32::from(total_fragments))?;

        let packets = sealed
            .into_iter()
            .zip(0u16..)
            .map(|((iv, ciphertext), fragment_id)| {
                let header = PacketHeader {
                    session_id,
                    seq_num: first_seq.wrapping_add(u32::from(fragment_id)),
                    fragment_id,
                    total_fragments,
                    payload_len: ciphertext.len() as u16,
                    iv,
                    digest: [0u8; DIGEST_SIZE],
                };
                self.seal(header, &ciphertext, salt)
            })
            .collect();

        trace!(
            session = %session_id,
            first_seq,
            fragments = total_fragments,
            "built fragmented frame"
        );
        Ok(packets)
    }

    /// Validate and decrypt one packet.
    ///
    /// # Errors
    ///
    /// - [`SvtpError::InvalidArgument`] for a bad key or salt size
    /// - [`SvtpError::Truncated`] if shorter than the 62-byte header
    /// - [`SvtpError::SessionNotFound`] if the header names no live session
    /// - [`SvtpError::LengthMismatch`] if the size disagrees with `payload_len`
    /// - [`SvtpError::IntegrityFailure`] if the digest does not match
    /// - [`SvtpError::Crypto`] if the ciphertext is not block-aligned
    pub fn parse(&self, packet: &[u8], key: &[u8], salt: &[u8]) -> SvtpResult<ParsedPacket> {
        check_secrets(key, salt)?;
        let header = PacketHeader::from_bytes(packet)?;
        self.lookup(header.session_id)?;

        let expected = header.packet_len();
        if packet.len() != expected {
            return Err(SvtpError::LengthMismatch {
                expected,
                actual: packet.len(),
            });
        }

        let ciphertext = &packet[PACKET_HEADER_SIZE..];
        let digest = self.digest(&header, ciphertext, salt);
        if !bool::from(digest[..].ct_eq(&header.digest[..])) {
            return Err(SvtpError::IntegrityFailure);
        }

        let payload = Sm4Cbc::new(key, &header.iv)?.decrypt(ciphertext)?;
        trace!(
            session = %header.session_id,
            seq = header.seq_num,
            fragment = header.fragment_id,
            "parsed packet"
        );
        Ok(ParsedPacket { header, payload })
    }

    fn lookup(&self, session_id: SessionId) -> SvtpResult<SessionHandle> {
        self.registry
            .get_session(session_id)
            .ok_or(SvtpError::SessionNotFound(session_id))
    }

    /// Draw an IV and CBC-encrypt `plaintext` under it.
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> SvtpResult<([u8; BLOCK_SIZE], Vec<u8>)> {
        let iv = generate_iv(self.random.as_ref())?;
        let ciphertext = Sm4Cbc::new(key, &iv)?.encrypt(plaintext)?;
        Ok((iv, ciphertext))
    }

    fn digest(&self, header: &PacketHeader, ciphertext: &[u8], salt: &[u8]) -> [u8; DIGEST_SIZE] {
        let mut hasher = Sm3::new();
        hasher.update(salt);
        if self.digest_scope == DigestScope::Header {
            hasher.update(&header.field_bytes());
        }
        hasher.update(&header.iv);
        hasher.update(ciphertext);
        hasher.finalize()
    }

    /// Fill in the digest and serialize header plus ciphertext.
    fn seal(&self, mut header: PacketHeader, ciphertext: &[u8], salt: &[u8]) -> Vec<u8> {
        header.digest = self.digest(&header, ciphertext, salt);
        let mut packet = Vec::with_capacity(PACKET_HEADER_SIZE + ciphertext.len());
        packet.extend_from_slice(&header.to_bytes());
        packet.extend_from_slice(ciphertext);
        packet
    }
}

impl std::fmt::Debug for PacketCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketCodec")
            .field("digest_scope", &self.digest_scope)
            .field("max_fragment_payload", &self.max_fragment_payload)
            .finish_non_exhaustive()
    }
}

fn check_secrets(key: &[u8], salt: &[u8]) -> SvtpResult<()> {
    if key.len() != KEY_SIZE {
        return Err(SvtpError::invalid_argument(format!(
            "key must be {KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }
    if salt.len() != SALT_SIZE {
        return Err(SvtpError::invalid_argument(format!(
            "salt must be {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RandomSourceError;
    use crate::crypto::pkcs7_pad;
    use std::net::SocketAddr;

    const KEY: [u8; 16] = [0x11; 16];
    const SALT: [u8; 32] = [0x22; 32];

    fn peer() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn setup(scope: DigestScope) -> (PacketCodec, SessionId) {
        let registry = Arc::new(SessionRegistry::default());
        let config = SvtpConfig::builder()
            .digest_scope(scope)
            .max_fragment_payload(32)
            .build()
            .unwrap();
        let codec = PacketCodec::new(Arc::clone(&registry), &config);
        let id = registry.create_session(peer());
        (codec, id)
    }

    struct Dry;

    impl RandomSource for Dry {
        fn fill(&self, _buf: &mut [u8]) -> Result<(), RandomSourceError> {
            Err(RandomSourceError("no entropy".into()))
        }
    }

    #[test]
    fn test_build_parse_roundtrip() {
        let (codec, id) = setup(DigestScope::Body);
        let payload = pkcs7_pad(b"FRAME-0001");

        let wire = codec.build(id, &payload, &KEY, &SALT).unwrap();
        assert_eq!(wire.len(), PACKET_HEADER_SIZE + 16);

        let parsed = codec.parse(&wire, &KEY, &SALT).unwrap();
        assert_eq!(parsed.payload, payload);
        assert_eq!(parsed.header.session_id, id);
        assert_eq!(parsed.header.seq_num, 0);
        assert_eq!(parsed.header.fragment_id, 0);
        assert_eq!(parsed.header.total_fragments, 1);
        assert_eq!(parsed.header.payload_len, 16);
    }

    #[test]
    fn test_build_wire_layout() {
        let (codec, id) = setup(DigestScope::Body);
        let wire = codec.build(id, &[0x5Au8; 32], &KEY, &SALT).unwrap();

        assert_eq!(wire[0..4], id.to_be_bytes());
        assert_eq!(wire[4..8], [0, 0, 0, 0]);
        assert_eq!(wire[8..10], [0, 0]);
        assert_eq!(wire[10..12], [0, 1]);
        assert_eq!(wire[12..14], [0, 32]);

        // digest = SM3(salt ‖ IV ‖ ciphertext)
        let mut hasher = Sm3::new();
        hasher.update(&SALT);
        hasher.update(&wire[14..30]);
        hasher.update(&wire[62..]);
        assert_eq!(wire[30..62], hasher.finalize());
    }

    #[test]
    fn test_build_consumes_sequence_numbers() {
        let (codec, id) = setup(DigestScope::Body);
        for expected in 0..4u32 {
            let wire = codec.build(id, &[1u8; 16], &KEY, &SALT).unwrap();
            assert_eq!(wire[4..8], expected.to_be_bytes());
        }
    }

    #[test]
    fn test_build_uses_fresh_iv() {
        let (codec, id) = setup(DigestScope::Body);
        let a = codec.build(id, &[3u8; 16], &KEY, &SALT).unwrap();
        let b = codec.build(id, &[3u8; 16], &KEY, &SALT).unwrap();
        assert_ne!(a[14..30], b[14..30]);
        assert_ne!(a[62..], b[62..]);
    }

    #[test]
    fn test_build_rejects_bad_arguments() {
        let (codec, id) = setup(DigestScope::Body);

        for (payload, key, salt) in [
            (&[][..], &KEY[..], &SALT[..]),
            (&[0u8; 16][..], &KEY[..15], &SALT[..]),
            (&[0u8; 16][..], &KEY[..], &SALT[..16]),
        ] {
            assert!(matches!(
                codec.build(id, payload, key, salt),
                Err(SvtpError::InvalidArgument(_))
            ));
        }

        let oversized = vec![0u8; 65536];
        assert!(matches!(
            codec.build(id, &oversized, &KEY, &SALT),
            Err(SvtpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_build_unknown_session() {
        let (codec, _) = setup(DigestScope::Body);
        assert!(matches!(
            codec.build(SessionId::new(404), &[0u8; 16], &KEY, &SALT),
            Err(SvtpError::SessionNotFound(id)) if id == SessionId::new(404)
        ));
    }

    #[test]
    fn test_build_unaligned_payload_keeps_sequence() {
        let (codec, id) = setup(DigestScope::Body);
        assert!(matches!(
            codec.build(id, b"FRAME-0001", &KEY, &SALT),
            Err(SvtpError::Crypto(CryptoError::InvalidLength(10)))
        ));

        let wire = codec.build(id, &[0u8; 16], &KEY, &SALT).unwrap();
        assert_eq!(wire[4..8], [0, 0, 0, 0]);
    }

    #[test]
    fn test_build_random_source_failure() {
        let registry = Arc::new(SessionRegistry::default());
        let codec =
            PacketCodec::with_random_source(Arc::clone(&registry), &SvtpConfig::default(), Arc::new(Dry));
        let id = registry.create_session(peer());

        assert!(matches!(
            codec.build(id, &[0u8; 16], &KEY, &SALT),
            Err(SvtpError::RandomSource(_))
        ));
    }

    #[test]
    fn test_parse_truncated() {
        let (codec, _) = setup(DigestScope::Body);
        assert!(matches!(
            codec.parse(&[0u8; 61], &KEY, &SALT),
            Err(SvtpError::Truncated { expected: 62, actual: 61 })
        ));
    }

    #[test]
    fn test_parse_length_mismatch() {
        let (codec, id) = setup(DigestScope::Body);
        let mut wire = codec.build(id, &[0u8; 16], &KEY, &SALT).unwrap();

        wire.push(0);
        assert!(matches!(
            codec.parse(&wire, &KEY, &SALT),
            Err(SvtpError::LengthMismatch { expected: 78, actual: 79 })
        ));

        wire.truncate(70);
        assert!(matches!(
            codec.parse(&wire, &KEY, &SALT),
            Err(SvtpError::LengthMismatch { expected: 78, actual: 70 })
        ));
    }

    #[test]
    fn test_parse_removed_session() {
        let (codec, id) = setup(DigestScope::Body);
        let wire = codec.build(id, &[0u8; 16], &KEY, &SALT).unwrap();

        codec.registry().remove_session(id);
        assert!(matches!(
            codec.parse(&wire, &KEY, &SALT),
            Err(SvtpError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_parse_wrong_salt() {
        let (codec, id) = setup(DigestScope::Body);
        let wire = codec.build(id, &[0u8; 16], &KEY, &SALT).unwrap();
        assert!(matches!(
            codec.parse(&wire, &KEY, &[0x23; 32]),
            Err(SvtpError::IntegrityFailure)
        ));
    }

    #[test]
    fn test_body_scope_detects_iv_digest_and_body_flips() {
        let (codec, id) = setup(DigestScope::Body);
        let wire = codec.build(id, &[0x42u8; 32], &KEY, &SALT).unwrap();

        for byte in 14..wire.len() {
            for bit in 0..8 {
                let mut tampered = wire.clone();
                tampered[byte] ^= 1 << bit;
                assert!(
                    matches!(codec.parse(&tampered, &KEY, &SALT), Err(SvtpError::IntegrityFailure)),
                    "flip at byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[test]
    fn test_header_scope_detects_every_flip() {
        let (codec, id) = setup(DigestScope::Header);
        let wire = codec.build(id, &[0x42u8; 32], &KEY, &SALT).unwrap();
        assert!(codec.parse(&wire, &KEY, &SALT).is_ok());

        for byte in 0..wire.len() {
            for bit in 0..8 {
                let mut tampered = wire.clone();
                tampered[byte] ^= 1 << bit;
                let result = codec.parse(&tampered, &KEY, &SALT);
                let ok = match byte {
                    0..4 => matches!(
                        result,
                        Err(SvtpError::SessionNotFound(_) | SvtpError::IntegrityFailure)
                    ),
                    12..14 => matches!(result, Err(SvtpError::LengthMismatch { .. })),
                    _ => matches!(result, Err(SvtpError::IntegrityFailure)),
                };
                assert!(ok, "flip at byte {byte} bit {bit} gave {result:?}");
            }
        }
    }

    #[test]
    fn test_build_fragments() {
        let (codec, id) = setup(DigestScope::Header);
        let payload: Vec<u8> = (0..80u8).collect();

        let packets = codec.build_fragments(id, &payload, &KEY, &SALT).unwrap();
        assert_eq!(packets.len(), 3);

        let mut recovered = Vec::new();
        for (i, packet) in packets.iter().enumerate() {
            let parsed = codec.parse(packet, &KEY, &SALT).unwrap();
            assert_eq!(parsed.header.seq_num, i as u32);
            assert_eq!(parsed.header.fragment_id, i as u16);
            assert_eq!(parsed.header.total_fragments, 3);
            recovered.extend(parsed.payload);
        }
        assert_eq!(recovered, payload);
        assert_eq!(packets[2].len(), PACKET_HEADER_SIZE + 16);
    }

    #[test]
    fn test_build_fragments_single() {
        let (codec, id) = setup(DigestScope::Body);
        let packets = codec.build_fragments(id, &[9u8; 32], &KEY, &SALT).unwrap();
        assert_eq!(packets.len(), 1);

        let parsed = codec.parse(&packets[0], &KEY, &SALT).unwrap();
        assert_eq!(parsed.header.total_fragments, 1);
        assert!(!parsed.header.is_fragmented());
    }

    #[test]
    fn test_build_fragments_unaligned() {
        let (codec, id) = setup(DigestScope::Body);
        assert!(matches!(
            codec.build_fragments(id, &[0u8; 33], &KEY, &SALT),
            Err(SvtpError::Crypto(CryptoError::InvalidLength(33)))
        ));
    }
}
