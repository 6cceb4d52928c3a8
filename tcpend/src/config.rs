//! Endpoint configuration.
//!
//! [`EndpointConfig`] carries the per-run parameters both roles share (payload
//! size, window size) plus the protocol [`Tuning`] knobs.  The defaults in
//! [`Tuning`] are the protocol constants; tests shrink some of them to keep
//! loopback runs short.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::HEADER_LEN;
use crate::rtt::DEFAULT_INITIAL_TIMEOUT;
use crate::timer::TeardownLinger;

/// Largest UDP payload over IPv4.
const MAX_UDP_PAYLOAD: usize = 65_507;

/// Largest segment payload that still fits in one UDP datagram.
pub const MAX_MTU: usize = MAX_UDP_PAYLOAD - HEADER_LEN;

/// Adjustable protocol timing parameters.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// RTO before any RTT sample is available.
    pub initial_timeout: Duration,
    /// Lower bound applied when arming a timer; the estimator itself is not
    /// clamped.
    pub min_timeout: Duration,
    /// Retransmissions allowed per segment before the transfer fails.
    pub max_retransmissions: u32,
    /// Interval between receiver FIN+ACK re-sends while closing.
    pub fin_resend_interval: Duration,
    /// How long the sender lingers once its FIN is acknowledged.
    pub linger: TeardownLinger,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            initial_timeout: DEFAULT_INITIAL_TIMEOUT,
            min_timeout: Duration::from_millis(20),
            max_retransmissions: 16,
            fin_resend_interval: Duration::from_millis(500),
            linger: TeardownLinger::default(),
        }
    }
}

impl Tuning {
    /// Timeout to arm a timer with, given the estimator's current RTO.
    pub fn arm_timeout(&self, current: Duration) -> Duration {
        current.max(self.min_timeout)
    }
}

/// Parameters shared by the sender and receiver roles.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Maximum payload bytes per segment.
    pub mtu: usize,
    /// Sliding window size, in segments.
    pub window: usize,
    /// Print one trace line per segment sent or received.
    pub trace: bool,
    pub tuning: Tuning,
}

impl EndpointConfig {
    /// Validate `mtu` and `window` and build a config with default tuning.
    pub fn new(mtu: usize, window: usize) -> Result<Self> {
        if mtu == 0 || mtu > MAX_MTU {
            return Err(Error::config(format!(
                "mtu must be between 1 and {MAX_MTU} bytes, got {mtu}"
            )));
        }
        if window == 0 {
            return Err(Error::config("window size must be at least one segment"));
        }
        Ok(Self {
            mtu,
            window,
            trace: true,
            tuning: Tuning::default(),
        })
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }
}
