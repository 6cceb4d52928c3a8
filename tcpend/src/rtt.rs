//! Round-trip-time estimation and retransmission timeout (RTO) derivation.
//!
//! The estimator follows the classic smoothed-RTT scheme:
//!
//! ```text
//! first sample R:   ERTT = R            EDEV = 0     RTO = 2·ERTT
//! later samples R:  SDEV = |R − ERTT|
//!                   ERTT = 7/8·ERTT + 1/8·R
//!                   EDEV = 3/4·EDEV + 1/4·SDEV
//!                   RTO  = ERTT + 4·EDEV
//! ```
//!
//! Before any sample has been observed the RTO is a fixed conservative value,
//! so the very first segment still has a retransmission safety net.
//!
//! Only the inbound path mutates the estimator (on an advancing ACK); timers
//! read [`RttEstimator::timeout`] when they are armed.

use std::time::Duration;

/// RTO used until the first RTT sample arrives.
pub const DEFAULT_INITIAL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Smoothed RTT / deviation state for one sending endpoint.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Smoothed RTT estimate (ERTT); `None` before the first sample.
    estimated_rtt: Option<Duration>,
    /// Smoothed mean deviation (EDEV).
    estimated_deviation: Duration,
    /// Current RTO.
    current_timeout: Duration,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_TIMEOUT)
    }
}

impl RttEstimator {
    /// Create an estimator whose RTO is `initial_timeout` until the first
    /// sample is observed.
    pub fn new(initial_timeout: Duration) -> Self {
        Self {
            estimated_rtt: None,
            estimated_deviation: Duration::ZERO,
            current_timeout: initial_timeout,
        }
    }

    /// Record a new RTT sample and update ERTT / EDEV / RTO.
    pub fn observe(&mut self, sample: Duration) {
        match self.estimated_rtt {
            None => {
                self.estimated_rtt = Some(sample);
                self.estimated_deviation = Duration::ZERO;
                self.current_timeout = sample * 2;
            }
            Some(ertt) => {
                let deviation = sample.abs_diff(ertt);
                let ertt = ertt * 7 / 8 + sample / 8;
                self.estimated_deviation = self.estimated_deviation * 3 / 4 + deviation / 4;
                self.estimated_rtt = Some(ertt);
                self.current_timeout = ertt + self.estimated_deviation * 4;
            }
        }
    }

    /// Current retransmission timeout.
    pub fn timeout(&self) -> Duration {
        self.current_timeout
    }

    /// Smoothed RTT, if at least one sample has been observed.
    pub fn estimated_rtt(&self) -> Option<Duration> {
        self.estimated_rtt
    }

    pub fn estimated_deviation(&self) -> Duration {
        self.estimated_deviation
    }
}
