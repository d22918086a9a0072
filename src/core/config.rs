//! SVTP configuration.
//!
//! One [`SvtpConfig`] feeds the session registry, the packet codec and the
//! transport. `liveness_timeout` is the single session timeout: the lazy
//! check on lookup and the background sweep both read it.

use std::time::Duration;

use super::constants::*;
use super::error::{SvtpError, SvtpResult};

/// Which bytes the integrity digest covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestScope {
    /// `salt ‖ IV ‖ ciphertext`.
    #[default]
    Body,
    /// `salt ‖ header fields ‖ IV ‖ ciphertext`; binds session, sequence,
    /// fragment and length fields to the digest.
    Header,
}

/// SVTP configuration.
#[derive(Debug, Clone)]
pub struct SvtpConfig {
    /// Sessions idle longer than this are treated as absent.
    pub liveness_timeout: Duration,

    /// How often the background sweeper runs.
    pub sweep_interval: Duration,

    /// Per-attempt ACK wait.
    pub ack_timeout: Duration,

    /// Backoff unit between delivery attempts.
    pub base_backoff: Duration,

    /// Send attempts for acknowledged delivery.
    pub max_retries: u32,

    /// Receive buffer size for the listener.
    pub recv_buffer_size: usize,

    /// Capacity of the inbound packet channel.
    pub channel_capacity: usize,

    /// Maximum ciphertext bytes per fragment (multiple of the block size).
    pub max_fragment_payload: usize,

    /// Incomplete frames are discarded after this long.
    pub reassembly_timeout: Duration,

    /// Maximum frames held in reassembly.
    pub max_pending_frames: usize,

    /// Digest coverage.
    pub digest_scope: DigestScope,
}

impl Default for SvtpConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_retries: DEFAULT_MAX_RETRIES,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_fragment_payload: DEFAULT_MAX_FRAGMENT_PAYLOAD,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            digest_scope: DigestScope::Body,
        }
    }
}

impl SvtpConfig {
    /// Start a builder from the defaults.
    pub fn builder() -> SvtpConfigBuilder {
        SvtpConfigBuilder::new()
    }

    /// Defaults overlaid with `SVTP_*` environment variables.
    pub fn from_env() -> SvtpResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// Recognised keys: `SVTP_LIVENESS_TIMEOUT_MS`, `SVTP_SWEEP_INTERVAL_MS`,
    /// `SVTP_ACK_TIMEOUT_MS`, `SVTP_MAX_RETRIES`, `SVTP_MAX_FRAGMENT_PAYLOAD`.
    pub fn from_lookup<F>(lookup: F) -> SvtpResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = SvtpConfigBuilder::new();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "SVTP_LIVENESS_TIMEOUT_MS")? {
            builder = builder.liveness_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SVTP_SWEEP_INTERVAL_MS")? {
            builder = builder.sweep_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "SVTP_ACK_TIMEOUT_MS")? {
            builder = builder.ack_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = parse_var::<u32, _>(&lookup, "SVTP_MAX_RETRIES")? {
            builder = builder.max_retries(retries);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "SVTP_MAX_FRAGMENT_PAYLOAD")? {
            builder = builder.max_fragment_payload(size);
        }

        builder.build()
    }

    /// Check invariants between fields.
    pub fn validate(&self) -> SvtpResult<()> {
        if self.liveness_timeout.is_zero() {
            return Err(SvtpError::Config("liveness_timeout must be non-zero".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(SvtpError::Config("sweep_interval must be non-zero".into()));
        }
        if self.ack_timeout.is_zero() {
            return Err(SvtpError::Config("ack_timeout must be non-zero".into()));
        }
        if self.max_retries == 0 {
            return Err(SvtpError::Config("max_retries must be at least 1".into()));
        }
        if self.recv_buffer_size < PACKET_HEADER_SIZE {
            return Err(SvtpError::Config(format!(
                "recv_buffer_size must hold a packet header ({PACKET_HEADER_SIZE} bytes)"
            )));
        }
        if self.channel_capacity == 0 {
            return Err(SvtpError::Config("channel_capacity must be non-zero".into()));
        }
        if self.max_fragment_payload == 0
            || self.max_fragment_payload % BLOCK_SIZE != 0
            || self.max_fragment_payload > MAX_ALIGNED_PAYLOAD_LEN
        {
            return Err(SvtpError::Config(format!(
                "max_fragment_payload must be a non-zero multiple of {BLOCK_SIZE} up to {MAX_ALIGNED_PAYLOAD_LEN}"
            )));
        }
        if self.max_pending_frames == 0 {
            return Err(SvtpError::Config("max_pending_frames must be non-zero".into()));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> SvtpResult<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| SvtpError::Config(format!("{key}: cannot parse {raw:?}"))),
        None => Ok(None),
    }
}

/// Builder for [`SvtpConfig`].
#[derive(Debug, Clone, Default)]
pub struct SvtpConfigBuilder {
    config: SvtpConfig,
}

impl SvtpConfigBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session liveness timeout.
    pub fn liveness_timeout(mut self, timeout: Duration) -> Self {
        self.config.liveness_timeout = timeout;
        self
    }

    /// Set the background sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set the per-attempt ACK timeout.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set the backoff unit.
    pub fn base_backoff(mut self, backoff: Duration) -> Self {
        self.config.base_backoff = backoff;
        self
    }

    /// Set the number of delivery attempts.
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Set the inbound channel capacity.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Set the maximum fragment payload.
    pub fn max_fragment_payload(mut self, size: usize) -> Self {
        self.config.max_fragment_payload = size;
        self
    }

    /// Set the reassembly timeout.
    pub fn reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.config.reassembly_timeout = timeout;
        self
    }

    /// Set the maximum number of frames in reassembly.
    pub fn max_pending_frames(mut self, max: usize) -> Self {
        self.config.max_pending_frames = max;
        self
    }

    /// Set the digest scope.
    pub fn digest_scope(mut self, scope: DigestScope) -> Self {
        self.config.digest_scope = scope;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> SvtpResult<SvtpConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = SvtpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.liveness_timeout, Duration::from_secs(30));
        assert_eq!(config.ack_timeout, Duration::from_millis(500));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.digest_scope, DigestScope::Body);
    }

    #[test]
    fn test_builder() {
        let config = SvtpConfig::builder()
            .liveness_timeout(Duration::from_secs(10))
            .ack_timeout(Duration::from_millis(50))
            .max_retries(5)
            .max_fragment_payload(512)
            .digest_scope(DigestScope::Header)
            .build()
            .unwrap();

        assert_eq!(config.liveness_timeout, Duration::from_secs(10));
        assert_eq!(config.ack_timeout, Duration::from_millis(50));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.max_fragment_payload, 512);
        assert_eq!(config.digest_scope, DigestScope::Header);
    }

    #[test]
    fn test_builder_rejects_invalid() {
        assert!(SvtpConfig::builder().max_retries(0).build().is_err());
        assert!(SvtpConfig::builder().liveness_timeout(Duration::ZERO).build().is_err());
        assert!(SvtpConfig::builder().max_fragment_payload(1000).build().is_err());
        assert!(SvtpConfig::builder().max_fragment_payload(0).build().is_err());
        assert!(SvtpConfig::builder().recv_buffer_size(16).build().is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("SVTP_LIVENESS_TIMEOUT_MS", "1500"),
            ("SVTP_MAX_RETRIES", "7"),
            ("SVTP_MAX_FRAGMENT_PAYLOAD", "256"),
        ]
        .into_iter()
        .collect();

        let config = SvtpConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.liveness_timeout, Duration::from_millis(1500));
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.max_fragment_payload, 256);
        assert_eq!(config.ack_timeout, DEFAULT_ACK_TIMEOUT);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = SvtpConfig::from_lookup(|key| {
            (key == "SVTP_ACK_TIMEOUT_MS").then(|| "soon".to_string())
        });
        assert!(matches!(result, Err(SvtpError::Config(_))));
    }
}
