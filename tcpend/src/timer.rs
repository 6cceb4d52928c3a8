//! Retransmission timer bookkeeping and the teardown linger policy.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within the retransmission timeout (RTO).  Instead of one OS
//! timer per outstanding segment, the sender runs a single scheduler task
//! that owns a [`RetransmitQueue`]: a min-heap of `(deadline, seq,
//! generation)` triples.
//!
//! Cancellation is implicit.  When a segment is acknowledged its window entry
//! disappears; when it is re-armed elsewhere (fast retransmit) its generation
//! changes.  A deadline that pops for a missing entry or an old generation is
//! simply discarded, so a timer racing an ACK can never resend acknowledged
//! data.
//!
//! This module also provides:
//! - [`Clock`]: the monotonic timestamp source stamped into every segment.
//! - [`TeardownLinger`]: how long the sender lingers after its FIN is
//!   acknowledged before terminating on its own.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Monotonic clock anchored at endpoint start-up.
///
/// Segment timestamps are nanoseconds since the anchor; only the endpoint
/// that produced a timestamp ever interprets it, so the two peers need no
/// shared epoch.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    epoch: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Nanoseconds elapsed since the anchor.
    pub fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Time elapsed since the anchor.
    pub fn elapsed(&self) -> Duration {
        self.epoch.elapsed()
    }

    /// Round-trip sample for an echoed timestamp; zero if the echo is from
    /// the future (corrupt or foreign).
    pub fn sample_since(&self, echoed_nanos: u64) -> Duration {
        Duration::from_nanos(self.now_nanos().saturating_sub(echoed_nanos))
    }
}

// ---------------------------------------------------------------------------
// RetransmitQueue
// ---------------------------------------------------------------------------

/// One armed retransmission timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Deadline {
    pub at: Instant,
    pub seq: u32,
    pub generation: u64,
}

/// Min-heap of armed retransmission deadlines.
#[derive(Debug, Default)]
pub struct RetransmitQueue {
    heap: BinaryHeap<Reverse<Deadline>>,
}

impl RetransmitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer for `seq` / `generation` firing at `at`.
    pub fn arm(&mut self, seq: u32, generation: u64, at: Instant) {
        self.heap.push(Reverse(Deadline {
            at,
            seq,
            generation,
        }));
    }

    /// Earliest armed deadline, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(d)| d.at)
    }

    /// Remove and return the earliest deadline if it is due at `now`.
    pub fn pop_expired(&mut self, now: Instant) -> Option<Deadline> {
        match self.heap.peek() {
            Some(Reverse(d)) if d.at <= now => self.heap.pop().map(|Reverse(d)| d),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// TeardownLinger
// ---------------------------------------------------------------------------

/// Post-close policy for the sending side.
///
/// Once the peer has acknowledged the sender's FIN (and sent its own), the
/// sender keeps answering straggler FIN+ACKs for `multiplier × RTO` and then
/// terminates unconditionally, without a further confirmation from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeardownLinger {
    pub multiplier: u32,
}

impl Default for TeardownLinger {
    fn default() -> Self {
        Self { multiplier: 16 }
    }
}

impl TeardownLinger {
    /// How long to linger given the current RTO.
    pub fn duration(&self, current_timeout: Duration) -> Duration {
        current_timeout * self.multiplier
    }
}
