//! Receiving endpoint: accept one transfer and write it to a sink.
//!
//! A single task multiplexes two event sources with `tokio::select!`:
//!
//! ```text
//!   socket.recv_from() ──▶ on_datagram ──▶ SYN  → SYN+ACK
//!                                          DATA → ReceiveWindow → sink, ACK
//!                                          FIN  → flush sink, FIN+ACK
//!                                          ACK  → teardown complete?
//!   resend.tick()      ──▶ (Closing only) re-send FIN+ACK
//! ```
//!
//! Every data segment, in order or not, is answered with the current
//! cumulative ACK echoing that segment's timestamp, so the sender sees
//! duplicate ACKs for gaps.  Segments that fail the checksum are dropped
//! without a reply.
//!
//! While closing, the FIN+ACK is re-sent every `fin_resend_interval` until
//! the sender acknowledges it (`ack == fin_seq + 1`).  After
//! `max_retransmissions` unanswered re-sends the receiver stops anyway: all
//! data has been written by then.

use std::net::SocketAddr;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::EndpointConfig;
use crate::error::{Error, Result};
use crate::packet::{flags, Header, Segment};
use crate::recv_window::{Arrival, ReceiveWindow};
use crate::socket::Socket;
use crate::state::{ConnectionState, Event, Role};
use crate::stats::TransferStats;
use crate::timer::Clock;
use crate::trace::{Direction, Tracer};

/// Whether the receive loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Done,
}

/// The receiving side of one transfer.
pub struct Receiver<W> {
    socket: Socket,
    sink: W,
    config: EndpointConfig,
    tracer: Tracer,
    state: ConnectionState,
    /// Created when the SYN arrives.
    window: Option<ReceiveWindow>,
    /// The sender this transfer is bound to, learned from its SYN.
    peer: Option<SocketAddr>,
    /// Our next sequence number: 0 for the SYN+ACK, then 1 for the FIN+ACK,
    /// then `fin_seq + 1`, the ACK number that completes teardown.
    snd_nxt: u32,
    /// Encoded FIN+ACK kept for re-sending while closing.
    fin_ack: Option<Vec<u8>>,
    fin_resends: u32,
    stats: TransferStats,
}

impl<W> Receiver<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(socket: Socket, sink: W, config: EndpointConfig) -> Self {
        let tracer = Tracer::new(Clock::new(), config.trace);
        Self {
            socket,
            sink,
            config,
            tracer,
            state: ConnectionState::Closed,
            window: None,
            peer: None,
            snd_nxt: 0,
            fin_ack: None,
            fin_resends: 0,
            stats: TransferStats::new(Role::Receiver),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Consume the receiver and hand back the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }

    /// Accept one transfer and run it to completion.
    pub async fn run(&mut self) -> Result<TransferStats> {
        log::info!(
            "[rcv] listening on {} (mtu={}, window={})",
            self.socket.local_addr,
            self.config.mtu,
            self.config.window
        );
        let mut resend = tokio::time::interval(self.config.tuning.fin_resend_interval);
        resend.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                received = self.socket.recv_from() => {
                    let (datagram, from) = received?;
                    self.on_datagram(&datagram, from, &mut resend).await?
                }
                _ = resend.tick(), if self.state == ConnectionState::Closing => {
                    self.resend_fin_ack().await?
                }
            };
            if flow == Flow::Done {
                break;
            }
        }

        log::info!(
            "[rcv] done: {} bytes written, {} out of sequence",
            self.stats.bytes,
            self.stats.out_of_sequence
        );
        Ok(self.stats.clone())
    }

    // -----------------------------------------------------------------------
    // Inbound dispatch
    // -----------------------------------------------------------------------

    async fn on_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        resend: &mut Interval,
    ) -> Result<Flow> {
        let segment = match Segment::decode(datagram) {
            Ok(decoded) if decoded.checksum_valid => decoded.segment,
            _ => {
                self.stats.checksum_failures += 1;
                log::debug!("[rcv] discarding corrupt datagram ({} bytes)", datagram.len());
                return Ok(Flow::Continue);
            }
        };

        match self.peer {
            Some(peer) if peer != from => {
                log::debug!("[rcv] ignoring datagram from {from}; bound to {peer}");
                return Ok(Flow::Continue);
            }
            None if !segment.header.is_syn() => {
                log::debug!("[rcv] ignoring segment from {from} before handshake");
                return Ok(Flow::Continue);
            }
            _ => {}
        }

        self.tracer.header(Direction::Receive, &segment.header);
        self.stats.segments_received += 1;

        if segment.header.is_syn() {
            self.on_syn(&segment.header, from).await?;
            Ok(Flow::Continue)
        } else if segment.header.is_fin() {
            self.on_fin(&segment.header, resend).await?;
            Ok(Flow::Continue)
        } else if !segment.payload.is_empty() {
            self.on_data(&segment).await?;
            Ok(Flow::Continue)
        } else {
            Ok(self.on_ack(&segment.header))
        }
    }

    async fn on_syn(&mut self, h: &Header, from: SocketAddr) -> Result<()> {
        match self.state.on(Role::Receiver, Event::SynReceived) {
            Some(next) => {
                self.state = next;
                self.peer = Some(from);
                self.window = Some(ReceiveWindow::new(
                    h.seq.wrapping_add(1),
                    self.config.window,
                    self.config.mtu,
                ));
                log::info!("[rcv] connection from {from}");
            }
            // The SYN+ACK was lost; answer the retransmitted SYN again.
            None if self.state.is_open() => {
                log::debug!("[rcv] duplicate SYN; re-sending SYN+ACK");
            }
            None => return Ok(()),
        }
        self.snd_nxt = 1;
        let reply = Segment::new(
            0,
            h.seq.wrapping_add(1),
            flags::SYN | flags::ACK,
            Vec::new(),
            h.timestamp,
        );
        self.send(&reply).await
    }

    async fn on_data(&mut self, segment: &Segment) -> Result<()> {
        let h = &segment.header;
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };

        if self.state.is_open() {
            match window.on_segment(h.seq, &segment.payload) {
                Arrival::Delivered(bytes) => {
                    self.sink.write_all(&bytes).await.map_err(Error::SinkWrite)?;
                    self.stats.bytes += bytes.len() as u64;
                    log::debug!("[rcv] ← DATA seq={} delivered={}", h.seq, bytes.len());
                }
                Arrival::Buffered => {
                    self.stats.out_of_sequence += 1;
                    log::debug!("[rcv] ← DATA seq={} buffered out of order", h.seq);
                }
                Arrival::Duplicate => {
                    log::debug!("[rcv] ← DATA seq={} duplicate", h.seq);
                }
                Arrival::Dropped(reason) => {
                    self.stats.dropped += 1;
                    log::debug!("[rcv] ← DATA seq={} dropped: {:?}", h.seq, reason);
                }
            }
        }
        self.ack(h.timestamp).await
    }

    async fn on_fin(&mut self, h: &Header, resend: &mut Interval) -> Result<()> {
        match self.state {
            ConnectionState::Open => {}
            ConnectionState::Closing => {
                log::debug!("[rcv] duplicate FIN; re-sending FIN+ACK");
                return self.send_fin_ack().await;
            }
            _ => return Ok(()),
        }

        let accepted = self
            .window
            .as_mut()
            .is_some_and(|window| window.on_fin(h.seq));
        if !accepted {
            log::debug!("[rcv] FIN seq={} ahead of missing data", h.seq);
            return self.ack(h.timestamp).await;
        }

        self.sink.shutdown().await.map_err(Error::SinkWrite)?;
        if let Some(next) = self.state.on(Role::Receiver, Event::FinReceived) {
            self.state = next;
        }
        let ack = self.ack_number();
        let fin_ack = Segment::new(
            self.snd_nxt,
            ack,
            flags::FIN | flags::ACK,
            Vec::new(),
            h.timestamp,
        );
        log::debug!("[rcv] ← FIN seq={}; → FIN+ACK ack={}", h.seq, ack);
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        self.fin_ack = Some(fin_ack.encode());
        self.fin_resends = 0;
        resend.reset();
        self.send_fin_ack().await
    }

    fn on_ack(&mut self, h: &Header) -> Flow {
        if self.state == ConnectionState::Closing && h.is_ack() && h.ack == self.snd_nxt {
            if let Some(next) = self.state.on(Role::Receiver, Event::TeardownComplete) {
                self.state = next;
            }
            log::info!("[rcv] teardown acknowledged");
            return Flow::Done;
        }
        Flow::Continue
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    async fn resend_fin_ack(&mut self) -> Result<Flow> {
        if self.fin_resends >= self.config.tuning.max_retransmissions {
            log::warn!(
                "[rcv] no teardown ACK after {} FIN+ACK re-sends; closing",
                self.fin_resends
            );
            self.state = ConnectionState::Closed;
            return Ok(Flow::Done);
        }
        self.fin_resends += 1;
        self.send_fin_ack().await?;
        Ok(Flow::Continue)
    }

    async fn send_fin_ack(&mut self) -> Result<()> {
        let (Some(bytes), Some(peer)) = (self.fin_ack.as_deref(), self.peer) else {
            return Ok(());
        };
        self.socket.send_to(bytes, peer).await?;
        self.tracer.bytes(Direction::Send, bytes);
        self.stats.segments_sent += 1;
        Ok(())
    }

    /// Send the current cumulative ACK, echoing `timestamp`.
    async fn ack(&mut self, timestamp: u64) -> Result<()> {
        let reply = Segment::new(
            self.snd_nxt,
            self.ack_number(),
            flags::ACK,
            Vec::new(),
            timestamp,
        );
        self.send(&reply).await
    }

    fn ack_number(&self) -> u32 {
        self.window.as_ref().map_or(0, ReceiveWindow::ack_number)
    }

    async fn send(&mut self, segment: &Segment) -> Result<()> {
        let Some(peer) = self.peer else {
            return Ok(());
        };
        self.socket.send_to(&segment.encode(), peer).await?;
        self.tracer.header(Direction::Send, &segment.header);
        self.stats.segments_sent += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pair() -> (Receiver<Vec<u8>>, Socket) {
        let config = EndpointConfig::new(4, 3).unwrap().with_trace(false);
        let rx = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (Receiver::new(rx, Vec::new(), config), peer)
    }

    async fn reply(peer: &Socket) -> Header {
        let (bytes, _) = peer.recv_from().await.unwrap();
        Segment::decode(&bytes).unwrap().segment.header
    }

    fn interval() -> Interval {
        tokio::time::interval(std::time::Duration::from_millis(500))
    }

    #[tokio::test]
    async fn handshake_then_gap_produces_duplicate_ack() {
        let (mut rcv, peer) = pair().await;
        let mut resend = interval();
        let from = peer.local_addr;

        let syn = Segment::new(0, 0, flags::SYN, vec![], 77).encode();
        rcv.on_datagram(&syn, from, &mut resend).await.unwrap();
        let h = reply(&peer).await;
        assert!(h.is_syn() && h.is_ack());
        assert_eq!((h.seq, h.ack, h.timestamp), (0, 1, 77));

        for (seq, payload, expected_ack) in [(1, b"ABCD", 5), (9, b"IJKL", 5), (5, b"EFGH", 13)] {
            let data = Segment::new(seq, 1, flags::ACK, payload.to_vec(), seq as u64).encode();
            rcv.on_datagram(&data, from, &mut resend).await.unwrap();
            let h = reply(&peer).await;
            assert_eq!(h.ack, expected_ack);
            assert_eq!(h.timestamp, seq as u64);
        }
        assert_eq!(rcv.stats.out_of_sequence, 1);
        assert_eq!(rcv.sink, b"ABCDEFGHIJKL");
    }

    #[tokio::test]
    async fn corrupt_datagram_is_dropped_silently() {
        let (mut rcv, peer) = pair().await;
        let mut resend = interval();
        let mut syn = Segment::new(0, 0, flags::SYN, vec![], 0).encode();
        syn[3] ^= 0x01;
        let flow = rcv
            .on_datagram(&syn, peer.local_addr, &mut resend)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert_eq!(rcv.stats.checksum_failures, 1);
        assert_eq!(rcv.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn fin_teardown_completes_on_matching_ack() {
        let (mut rcv, peer) = pair().await;
        let mut resend = interval();
        let from = peer.local_addr;

        let syn = Segment::new(0, 0, flags::SYN, vec![], 0).encode();
        rcv.on_datagram(&syn, from, &mut resend).await.unwrap();
        reply(&peer).await;

        let fin = Segment::new(1, 1, flags::FIN, vec![], 0).encode();
        rcv.on_datagram(&fin, from, &mut resend).await.unwrap();
        let h = reply(&peer).await;
        assert!(h.is_fin() && h.is_ack());
        assert_eq!((h.seq, h.ack), (1, 2));
        assert_eq!(rcv.state, ConnectionState::Closing);

        // An ACK for anything but the FIN+ACK does not finish the transfer.
        let stray = Segment::new(2, 1, flags::ACK, vec![], 0).encode();
        let flow = rcv.on_datagram(&stray, from, &mut resend).await.unwrap();
        assert_eq!(flow, Flow::Continue);

        let last = Segment::new(2, 2, flags::ACK, vec![], 0).encode();
        let flow = rcv.on_datagram(&last, from, &mut resend).await.unwrap();
        assert_eq!(flow, Flow::Done);
        assert_eq!(rcv.state, ConnectionState::Closed);
    }

    #[tokio::test]
    async fn out_of_order_fin_is_not_accepted() {
        let (mut rcv, peer) = pair().await;
        let mut resend = interval();
        let from = peer.local_addr;

        let syn = Segment::new(0, 0, flags::SYN, vec![], 0).encode();
        rcv.on_datagram(&syn, from, &mut resend).await.unwrap();
        reply(&peer).await;

        let fin = Segment::new(5, 1, flags::FIN, vec![], 0).encode();
        rcv.on_datagram(&fin, from, &mut resend).await.unwrap();
        let h = reply(&peer).await;
        assert!(!h.is_fin());
        assert_eq!(h.ack, 1);
        assert_eq!(rcv.state, ConnectionState::Open);
    }

    #[tokio::test]
    async fn gives_up_after_resend_cap() {
        let (mut rcv, _peer) = pair().await;
        rcv.state = ConnectionState::Closing;
        for _ in 0..rcv.config.tuning.max_retransmissions {
            assert_eq!(rcv.resend_fin_ack().await.unwrap(), Flow::Continue);
        }
        assert_eq!(rcv.resend_fin_ack().await.unwrap(), Flow::Done);
        assert_eq!(rcv.state, ConnectionState::Closed);
    }
}
