//! Send-side sliding window.
//!
//! [`SendWindow`] tracks every segment that has been transmitted but not yet
//! cumulatively acknowledged, keyed by its starting sequence number.
//!
//! # Protocol contract
//!
//! - At most `capacity` segments may be outstanding at once.  Capacity is
//!   counted in **segments**, not bytes: a short final segment occupies a
//!   whole slot.
//! - ACKs are **cumulative**: `ack = K` means the peer has every sequence
//!   number below `K`, so every entry starting at or below `K − 1` is
//!   released.
//! - An ACK that repeats the current cumulative point is a duplicate; the
//!   third consecutive duplicate asks for a fast retransmit of the oldest
//!   outstanding segment.
//!
//! This module only manages state; all socket I/O and timer scheduling is
//! the caller's responsibility.
//!
//! # Sequence-number layout
//!
//! ```text
//!  snd_una             snd_nxt
//!      │                  │
//!  ────┼──────────────────┼──────────────────▶ seq space
//!      │ <── in flight ──▶│ <── sendable ───▶
//! ```

use std::collections::BTreeMap;

use crate::packet;

/// Consecutive duplicate ACKs that trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// WindowEntry
// ---------------------------------------------------------------------------

/// A single outstanding segment occupying one slot in the window.
#[derive(Debug, Clone)]
pub struct WindowEntry {
    /// The encoded segment, ready to hand to the socket.
    pub bytes: Vec<u8>,
    /// Flags the segment was sent with.
    pub flags: u8,
    /// Sequence numbers consumed by the segment.
    pub len: u32,
    /// Number of retransmissions so far (0 = only the original send).
    pub attempts: u32,
    /// Identifies the timer currently armed for this entry.  A timer that
    /// fires with a different generation is stale and must be ignored.
    pub generation: u64,
}

/// What the caller should do after feeding an ACK to [`SendWindow::on_ack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The cumulative point advanced and `acked` entries were released.
    Advanced { acked: usize },
    /// The ACK repeated the cumulative point; `count` duplicates so far.
    Duplicate { count: u32 },
    /// Third duplicate: retransmit the oldest outstanding segment now.
    FastRetransmit { seq: u32 },
    /// Old, spurious, or nothing outstanding: no action.
    Ignored,
}

/// A segment pulled out of the window for retransmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retransmission {
    pub seq: u32,
    /// Re-stamped bytes (fresh timestamp and checksum, same payload).
    pub bytes: Vec<u8>,
    pub attempts: u32,
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Sliding-window send state for one transfer.
#[derive(Debug)]
pub struct SendWindow {
    /// Lowest unacknowledged sequence number (`lastAcknowledged + 1`).
    snd_una: u32,
    /// First sequence number after the newest tracked segment.
    snd_nxt: u32,
    /// Maximum number of outstanding segments.
    capacity: usize,
    /// Outstanding segments ordered by sequence number (first = oldest).
    entries: BTreeMap<u32, WindowEntry>,
    /// Consecutive duplicate ACKs seen at the current cumulative point.
    dup_acks: u32,
    next_generation: u64,
}

impl SendWindow {
    /// Create an empty window admitting up to `capacity` outstanding
    /// segments.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "window capacity must be at least 1");
        Self {
            snd_una: 0,
            snd_nxt: 0,
            capacity,
            entries: BTreeMap::new(),
            dup_acks: 0,
            next_generation: 0,
        }
    }

    /// `true` when one more segment may be sent without exceeding the
    /// window.
    pub fn admit(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Number of segments currently awaiting acknowledgement.
    pub fn outstanding(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lowest unacknowledged sequence number.
    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    /// Highest cumulatively acknowledged sequence number.
    pub fn last_acknowledged(&self) -> u32 {
        self.snd_una.wrapping_sub(1)
    }

    /// Sequence number of the oldest outstanding segment.
    pub fn oldest(&self) -> Option<u32> {
        self.entries.keys().next().copied()
    }

    pub fn get(&self, seq: u32) -> Option<&WindowEntry> {
        self.entries.get(&seq)
    }

    /// `true` when `seq` is still outstanding and its armed timer is
    /// `generation`.
    pub fn is_current(&self, seq: u32, generation: u64) -> bool {
        self.entries
            .get(&seq)
            .is_some_and(|e| e.generation == generation)
    }

    /// Place a just-transmitted segment into the window.
    ///
    /// Returns the generation the caller must arm its timer with.
    pub fn track(&mut self, seq: u32, bytes: Vec<u8>, flags: u8, len: u32) -> u64 {
        debug_assert!(
            self.admit(),
            "track called on a full window ({} / {})",
            self.entries.len(),
            self.capacity
        );
        let generation = self.bump_generation();
        self.entries.insert(
            seq,
            WindowEntry {
                bytes,
                flags,
                len,
                attempts: 0,
                generation,
            },
        );
        let end = seq.wrapping_add(len);
        if end > self.snd_nxt {
            self.snd_nxt = end;
        }
        generation
    }

    /// Process a cumulative ACK.
    pub fn on_ack(&mut self, ack: u32) -> AckOutcome {
        if ack == self.snd_una {
            if self.entries.is_empty() {
                return AckOutcome::Ignored;
            }
            self.dup_acks += 1;
            if self.dup_acks >= DUP_ACK_THRESHOLD {
                self.dup_acks = 0;
                if let Some(seq) = self.oldest() {
                    return AckOutcome::FastRetransmit { seq };
                }
            }
            return AckOutcome::Duplicate {
                count: self.dup_acks,
            };
        }

        // Behind the cumulative point, or acknowledging data never sent.
        if ack < self.snd_una || ack > self.snd_nxt {
            return AckOutcome::Ignored;
        }

        self.snd_una = ack;
        self.dup_acks = 0;
        // Keep entries starting at or after `ack`; release the rest.
        let remaining = self.entries.split_off(&ack);
        let acked = std::mem::replace(&mut self.entries, remaining).len();
        AckOutcome::Advanced { acked }
    }

    /// Pull `seq` out for retransmission: bump its attempt counter, give it
    /// a new timer generation, and re-stamp its bytes with `timestamp`.
    ///
    /// Returns `None` if `seq` is no longer outstanding.
    pub fn retransmit(&mut self, seq: u32, timestamp: u64) -> Option<Retransmission> {
        let generation = self.bump_generation();
        let entry = self.entries.get_mut(&seq)?;
        entry.attempts += 1;
        entry.generation = generation;
        packet::restamp(&mut entry.bytes, timestamp);
        Some(Retransmission {
            seq,
            bytes: entry.bytes.clone(),
            attempts: entry.attempts,
            generation,
        })
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
