//! `tcpend`: reliable, TCP-like file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   SYN / DATA / FIN   ┌──────────┐
//!  │  Sender  │─────────────────────▶│ Receiver │──▶ sink
//!  └────┬─────┘                      └─────┬────┘
//!       │        SYN+ACK / ACK / FIN+ACK   │
//!       │◀─────────────────────────────────┘
//!       │
//!  ┌────▼────────────────┐     ┌──────────────────────┐
//!  │ SendWindow          │     │ ReceiveWindow        │
//!  │ RttEstimator        │     │ (out-of-order buffer)│
//!  │ RetransmitQueue     │     └──────────────────────┘
//!  └────┬────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket,
//!  └───────────┘   optionally routed through the fault Simulator)
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       wire format and Internet checksum
//! - [`rtt`]          RTT estimation and retransmission timeout
//! - [`send_window`]  outstanding segments, cumulative and duplicate ACKs
//! - [`recv_window`]  in-order delivery and out-of-order buffering
//! - [`timer`]        monotonic clock, retransmit deadlines, linger policy
//! - [`state`]        connection finite-state machine
//! - [`sender`]       sending endpoint (outbound, inbound, scheduler tasks)
//! - [`receiver`]     receiving endpoint
//! - [`socket`]       async UDP socket abstraction
//! - [`simulator`]    optional lossy/reordering network layer for testing
//! - [`trace`]        per-segment trace lines
//! - [`stats`]        end-of-transfer statistics
//! - [`config`]       endpoint parameters and protocol tuning
//! - [`error`]        fatal error type

pub mod config;
pub mod error;
pub mod packet;
pub mod receiver;
pub mod recv_window;
pub mod rtt;
pub mod send_window;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;
pub mod trace;

pub use error::{Error, Result};
