//! Optional network simulator for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, a [`crate::socket::Socket`] can route its outbound datagrams
//! through a [`Simulator`] that applies a configurable fault model:
//!
//! | Fault            | Description                                       |
//! |------------------|---------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.     |
//! | Targeted loss    | Drop the first data segment at each `drop_once`   |
//! |                  | sequence number.                                  |
//! | Reordering       | Hold a datagram back until the next one has been  |
//! |                  | sent, with probability `reorder_rate`.            |
//! | Duplication      | Deliver a datagram twice.                         |
//! | Corruption       | Flip one random bit.                              |
//!
//! All randomness comes from a [`StdRng`] seeded with `seed`, so a failing
//! run replays exactly.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::Segment;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`; values outside it are
/// clamped.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back behind the next one.
    pub reorder_rate: f64,
    /// Probability that a datagram is sent twice.
    pub duplicate_rate: f64,
    /// Probability that a single bit of a datagram is flipped.
    pub corrupt_rate: f64,
    /// Sequence numbers of data segments to drop on first transmission.
    pub drop_once: Vec<u32>,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            reorder_rate: 0.0,
            duplicate_rate: 0.0,
            corrupt_rate: 0.0,
            drop_once: Vec::new(),
            seed: 0,
        }
    }
}

/// Counters for what the simulator did, for test assertions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultStats {
    pub dropped: u64,
    pub duplicated: u64,
    pub corrupted: u64,
    pub reordered: u64,
}

/// Fault-injection state for one socket.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
    /// `drop_once` targets already dropped.
    spent: HashSet<u32>,
    /// Datagram held back for reordering.
    held: Option<Vec<u8>>,
    stats: FaultStats,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            spent: HashSet::new(),
            held: None,
            stats: FaultStats::default(),
        }
    }

    pub fn stats(&self) -> FaultStats {
        self.stats
    }

    /// Apply the fault model to one outbound datagram.
    ///
    /// Returns the datagrams to put on the wire now, in order.
    pub fn process(&mut self, datagram: &[u8]) -> Vec<Vec<u8>> {
        if self.targeted(datagram) {
            self.stats.dropped += 1;
            log::debug!("[sim] dropping targeted segment");
            return Vec::new();
        }
        if self.roll(self.config.loss_rate) {
            self.stats.dropped += 1;
            log::debug!("[sim] dropping {} byte datagram", datagram.len());
            return Vec::new();
        }

        let mut current = datagram.to_vec();
        if !current.is_empty() && self.roll(self.config.corrupt_rate) {
            let bit = self.rng.gen_range(0..current.len() * 8);
            current[bit / 8] ^= 1 << (bit % 8);
            self.stats.corrupted += 1;
            log::debug!("[sim] flipped bit {bit}");
        }

        let copies = if self.roll(self.config.duplicate_rate) {
            self.stats.duplicated += 1;
            2
        } else {
            1
        };

        if self.held.is_none() && self.roll(self.config.reorder_rate) {
            self.stats.reordered += 1;
            log::debug!("[sim] holding datagram back");
            let mut out = Vec::new();
            if copies == 2 {
                out.push(current.clone());
            }
            self.held = Some(current);
            return out;
        }

        let mut out = vec![current; copies];
        if let Some(held) = self.held.take() {
            out.push(held);
        }
        out
    }

    /// `true` if `datagram` is a data segment listed in `drop_once` that has
    /// not been dropped yet.
    fn targeted(&mut self, datagram: &[u8]) -> bool {
        if self.config.drop_once.is_empty() {
            return false;
        }
        let Ok(decoded) = Segment::decode(datagram) else {
            return false;
        };
        let header = &decoded.segment.header;
        header.payload_len > 0
            && self.config.drop_once.contains(&header.seq)
            && self.spent.insert(header.seq)
    }

    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen_bool(rate.min(1.0))
    }
}
