//! Round-trip time estimation.
//!
//! RFC 6298 smoothing over ACK round trips measured by the transport.
//! The estimate is diagnostic: delivery uses the configured ACK window, and
//! the smoothed value is surfaced through session snapshots.

use std::time::Duration;

use crate::core::{INITIAL_RTO, MAX_RTO, MIN_RTO, RTO_GRANULARITY};

/// RTT estimator implementing RFC 6298.
///
/// Keeps the smoothed RTT (SRTT), the RTT variance (RTTVAR) and the derived
/// retransmission timeout (RTO). SRTT reads as zero until the first sample.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: Duration,
    rttvar: Duration,
    rto: Duration,
    samples: u64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    /// Create an estimator with no samples.
    pub fn new() -> Self {
        Self {
            srtt: Duration::ZERO,
            rttvar: Duration::ZERO,
            rto: INITIAL_RTO,
            samples: 0,
        }
    }

    /// Fold in a new RTT sample.
    ///
    /// - First sample: `SRTT = R`, `RTTVAR = R / 2`
    /// - Later: `RTTVAR = 3/4 RTTVAR + 1/4 |SRTT - R|`, then `SRTT = 7/8 SRTT + 1/8 R`
    pub fn update(&mut self, sample: Duration) {
        if self.samples == 0 {
            self.srtt = sample;
            self.rttvar = sample / 2;
        } else {
            let deviation = self.srtt.abs_diff(sample);
            self.rttvar = (self.rttvar.saturating_mul(3) + deviation) / 4;
            self.srtt = (self.srtt.saturating_mul(7) + sample) / 8;
        }
        self.samples += 1;
        self.rto = self.computed_rto();
    }

    fn computed_rto(&self) -> Duration {
        // RTO = SRTT + max(G, 4 * RTTVAR)
        let rto = self.srtt + RTO_GRANULARITY.max(self.rttvar.saturating_mul(4));
        rto.clamp(MIN_RTO, MAX_RTO)
    }

    /// Smoothed RTT (zero before the first sample).
    pub fn srtt(&self) -> Duration {
        self.srtt
    }

    /// RTT variance.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    /// Current retransmission timeout.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Number of samples folded in.
    pub fn samples(&self) -> u64 {
        self.samples
    }
}
