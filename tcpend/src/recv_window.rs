//! Receive-side window and out-of-order reassembly.
//!
//! [`ReceiveWindow`] implements the receiver half of the sliding window:
//!
//! - An **in-order** segment (seq == `rcv_nxt`) is delivered immediately,
//!   followed by any buffered segments that have become contiguous.
//! - An **out-of-order** segment inside the window is parked in a bounded
//!   buffer (capacity = window size, in segments) keyed by sequence number.
//! - A segment beyond the window, or one that does not fit because the
//!   buffer is full, is dropped; the sender's retransmission timer recovers
//!   it.
//! - A segment below `rcv_nxt` is a duplicate: nothing is written again, but
//!   the caller still answers with the current cumulative ACK.
//!
//! This module only manages state; writing delivered bytes to the output
//! sink and sending ACKs is the caller's responsibility.

use std::collections::BTreeMap;

/// Why an inbound segment was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Starts past `rcv_nxt + window × mtu`.
    BeyondWindow,
    /// The out-of-order buffer already holds `capacity` segments.
    BufferFull,
}

/// Result of feeding one data segment to [`ReceiveWindow::on_segment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Contiguous bytes ready to be written, in offset order.  Contains the
    /// segment itself plus everything it unblocked from the buffer.
    Delivered(Vec<u8>),
    /// Parked in the out-of-order buffer.
    Buffered,
    /// Already written or already buffered.
    Duplicate,
    Dropped(DropReason),
}

// ---------------------------------------------------------------------------
// ReceiveWindow
// ---------------------------------------------------------------------------

/// Receive-side state for one transfer.
#[derive(Debug)]
pub struct ReceiveWindow {
    /// Next expected sequence number (`RCV.NXT`).
    rcv_nxt: u32,
    /// Maximum number of buffered out-of-order segments.
    capacity: usize,
    /// Largest payload a peer segment may carry.
    mtu: usize,
    /// Out-of-order payloads keyed by sequence number.
    buffer: BTreeMap<u32, Vec<u8>>,
}

impl ReceiveWindow {
    /// Create a new [`ReceiveWindow`].
    ///
    /// `rcv_nxt` is the first data sequence number expected from the peer;
    /// after the SYN at sequence 0 this is 1.
    pub fn new(rcv_nxt: u32, capacity: usize, mtu: usize) -> Self {
        Self {
            rcv_nxt,
            capacity,
            mtu,
            buffer: BTreeMap::new(),
        }
    }

    /// Cumulative ACK number to place in the next outbound segment.
    pub fn ack_number(&self) -> u32 {
        self.rcv_nxt
    }

    /// Number of segments parked out of order.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Process an inbound data segment.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> Arrival {
        if payload.is_empty() || seq < self.rcv_nxt {
            return Arrival::Duplicate;
        }

        if seq == self.rcv_nxt {
            let mut out = payload.to_vec();
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            while let Some(next) = self.buffer.remove(&self.rcv_nxt) {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(next.len() as u32);
                out.extend_from_slice(&next);
            }
            // Anything still keyed below the frontier overlaps delivered data.
            self.buffer = self.buffer.split_off(&self.rcv_nxt);
            return Arrival::Delivered(out);
        }

        let limit = u64::from(self.rcv_nxt) + (self.capacity as u64) * (self.mtu as u64);
        if u64::from(seq) >= limit {
            return Arrival::Dropped(DropReason::BeyondWindow);
        }
        if self.buffer.contains_key(&seq) {
            return Arrival::Duplicate;
        }
        if self.buffer.len() >= self.capacity {
            return Arrival::Dropped(DropReason::BufferFull);
        }
        self.buffer.insert(seq, payload.to_vec());
        Arrival::Buffered
    }

    /// Advance `RCV.NXT` past a FIN (which consumes one sequence number).
    ///
    /// Returns `false` when the FIN is not in order; it is then ignored.
    pub fn on_fin(&mut self, fin_seq: u32) -> bool {
        if fin_seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
