//! Transfer statistics reported when an endpoint terminates.

use std::fmt;

use crate::state::Role;

/// Counters accumulated over one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStats {
    pub role: Role,
    /// Payload bytes sent (sender, first transmissions only) or written
    /// (receiver).
    pub bytes: u64,
    pub segments_sent: u64,
    pub segments_received: u64,
    pub retransmissions: u64,
    pub duplicate_acks: u64,
    /// Datagrams discarded because they failed checksum or framing checks.
    pub checksum_failures: u64,
    /// Data segments that arrived ahead of the in-order frontier.
    pub out_of_sequence: u64,
    /// Data segments discarded for lack of window or buffer space.
    pub dropped: u64,
}

impl TransferStats {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            bytes: 0,
            segments_sent: 0,
            segments_received: 0,
            retransmissions: 0,
            duplicate_acks: 0,
            checksum_failures: 0,
            out_of_sequence: 0,
            dropped: 0,
        }
    }
}

impl fmt::Display for TransferStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Sender => {
                writeln!(f, "---------------- Sender Termination ----------------")?;
                writeln!(f, "Amount of data transferred: {}", self.bytes)?;
                writeln!(f, "Number of packets sent: {}", self.segments_sent)?;
                writeln!(f, "Number of packets received: {}", self.segments_received)?;
                writeln!(
                    f,
                    "Number of packets discarded due to checksum: {}",
                    self.checksum_failures
                )?;
                writeln!(f, "Number of retransmissions: {}", self.retransmissions)?;
                write!(f, "Number of duplicate acks: {}", self.duplicate_acks)
            }
            Role::Receiver => {
                writeln!(f, "--------------- Receiver Termination ---------------")?;
                writeln!(f, "Amount of data received: {}", self.bytes)?;
                writeln!(f, "Number of packets sent: {}", self.segments_sent)?;
                writeln!(f, "Number of packets received: {}", self.segments_received)?;
                writeln!(f, "Number of out-of-sequence packets: {}", self.out_of_sequence)?;
                writeln!(f, "Number of packets dropped: {}", self.dropped)?;
                write!(
                    f,
                    "Number of packets discarded due to checksum: {}",
                    self.checksum_failures
                )
            }
        }
    }
}
