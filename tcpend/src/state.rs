//! Connection finite-state machine (FSM).
//!
//! Both endpoint roles share one set of states; the legal transitions differ
//! per [`Role`]:
//!
//! ```text
//!  sender:    Closed ─SYN sent─▶ HandshakeSent ─SYN rcvd─▶ Open
//!                                                           │
//!             Closed ◀─linger expired─ Closing ◀─FIN rcvd─ FinSent ◀─FIN sent─┘
//!
//!  receiver:  Closed ─SYN rcvd─▶ Open ─FIN rcvd─▶ Closing ─teardown ACK─▶ Closed
//! ```
//!
//! The endpoint loops hold the current state and feed it [`Event`]s; an
//! event that is not legal in the current state yields `None` and the
//! triggering segment is treated as a duplicate.

/// Which side of the transfer an endpoint plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Data source: opens the connection and sends the file.
    Sender,
    /// Data sink: accepts the connection and writes the file.
    Receiver,
}

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Sender only: SYN has been sent; waiting for the peer's SYN.
    HandshakeSent,
    /// Handshake complete; data transfer in progress.
    Open,
    /// Sender only: all data acknowledged and FIN sent.
    FinSent,
    /// FIN exchange under way: the sender lingers, the receiver re-sends its
    /// FIN+ACK until the teardown acknowledgment arrives.
    Closing,
}

/// Protocol events that drive transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SynSent,
    SynReceived,
    FinSent,
    FinReceived,
    /// Sender: linger expired.  Receiver: peer acknowledged our FIN+ACK.
    TeardownComplete,
}

impl ConnectionState {
    /// State reached from `self` on `event` for `role`, or `None` if the
    /// event is not legal here.
    pub fn on(self, role: Role, event: Event) -> Option<ConnectionState> {
        use ConnectionState::*;

        match (role, self, event) {
            (Role::Sender, Closed, Event::SynSent) => Some(HandshakeSent),
            (Role::Sender, HandshakeSent, Event::SynReceived) => Some(Open),
            (Role::Sender, Open, Event::FinSent) => Some(FinSent),
            (Role::Sender, FinSent, Event::FinReceived) => Some(Closing),
            (Role::Sender, Closing, Event::TeardownComplete) => Some(Closed),

            (Role::Receiver, Closed, Event::SynReceived) => Some(Open),
            (Role::Receiver, Open, Event::FinReceived) => Some(Closing),
            (Role::Receiver, Closing, Event::TeardownComplete) => Some(Closed),

            _ => None,
        }
    }

    /// `true` while new application data may be produced or accepted.
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
