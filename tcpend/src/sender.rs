//! Sending endpoint: handshake, windowed data transfer, and teardown.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────────── Arc<Shared> ─────────────────────┐
//!                 │  Mutex<SenderCore>: state, SendWindow, RttEstimator, │
//!                 │                     stats, next_seq, final_queued    │
//!                 └──────▲──────────────────▲───────────────────▲────────┘
//!                        │                  │                   │
//!   source ──▶  outbound (caller)     inbound task        scheduler task
//!               SYN, DATA, FIN        ACK / FIN+ACK        RTO expiry,
//!                   │                 dup ACK, FIN          linger expiry
//!                   │                      │   Arm/Linger ──▶   │
//!                   └───────────▶   Arc<Socket>  ◀──────────────┘
//! ```
//!
//! The three activities share one mutex-guarded [`SenderCore`]; the lock is
//! never held across an `.await`.  The outbound path parks on a
//! [`Notify`] while the window is full (or the handshake incomplete) and is
//! woken by the inbound task whenever an ACK releases a slot.
//!
//! Retransmission timers live in a single scheduler task (see
//! [`crate::timer::RetransmitQueue`]).  Whichever task first observes a
//! terminal condition (linger expiry, the retransmission cap, a socket
//! error) reports it on a `done` channel and [`Sender::run`] tears the
//! others down.
//!
//! # Sequence numbers
//!
//! ```text
//!   SYN      seq 0            (consumes 1)
//!   DATA     seq 1 ..= len    (consumes payload length)
//!   FIN      seq len + 1      (consumes 1)
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::{sleep_until, Instant};

use crate::config::{EndpointConfig, Tuning};
use crate::error::{Error, Result};
use crate::packet::{flags, Segment};
use crate::rtt::RttEstimator;
use crate::send_window::{AckOutcome, SendWindow};
use crate::socket::Socket;
use crate::state::{ConnectionState, Event, Role};
use crate::stats::TransferStats;
use crate::timer::{Clock, Deadline, RetransmitQueue};
use crate::trace::{Direction, Tracer};

/// Largest source the 32-bit sequence space can carry: SYN and FIN each
/// consume one number.
pub const MAX_SOURCE_LEN: u64 = u32::MAX as u64 - 2;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Requests from the outbound and inbound paths to the scheduler task.
#[derive(Debug, Clone, Copy)]
enum TimerCommand {
    /// Arm a retransmission timer for `seq`.
    Arm {
        seq: u32,
        generation: u64,
        after: Duration,
    },
    /// Our FIN is acknowledged and the peer's FIN seen: stop after `after`.
    Linger { after: Duration },
}

/// An encoded segment ready for the wire, plus the timer it needs.
#[derive(Debug)]
struct Outgoing {
    bytes: Vec<u8>,
    timer: Option<TimerCommand>,
}

/// What the inbound path must do after processing one segment.
#[derive(Debug, Default)]
struct Reaction {
    outgoing: Vec<Outgoing>,
    /// The handshake completed or the window opened.
    wake: bool,
    linger: Option<Duration>,
}

/// Protocol state guarded by the shared mutex.
#[derive(Debug)]
struct SenderCore {
    state: ConnectionState,
    window: SendWindow,
    rtt: RttEstimator,
    stats: TransferStats,
    /// Sequence number the next new segment will carry.
    next_seq: u32,
    /// Acknowledgement number for outbound segments (peer's last seq + 1).
    peer_ack: u32,
    /// The last data segment has been tracked; FIN follows once the window
    /// drains.
    final_queued: bool,
}

impl SenderCore {
    fn new(config: &EndpointConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            window: SendWindow::new(config.window),
            rtt: RttEstimator::new(config.tuning.initial_timeout),
            stats: TransferStats::new(Role::Sender),
            next_seq: 0,
            peer_ack: 0,
            final_queued: false,
        }
    }

    fn arm_after(&self, tuning: &Tuning) -> Duration {
        tuning.arm_timeout(self.rtt.timeout())
    }

    /// Encode a new segment at `next_seq`, place it in the window, and
    /// advance `next_seq` past it.
    fn track(&mut self, flags: u8, payload: Vec<u8>, clock: &Clock, tuning: &Tuning) -> Outgoing {
        let seq = self.next_seq;
        let segment = Segment::new(seq, self.peer_ack, flags, payload, clock.now_nanos());
        let len = segment.seq_len();
        let bytes = segment.encode();
        let generation = self.window.track(seq, bytes.clone(), flags, len);
        self.next_seq = seq.wrapping_add(len);
        self.stats.segments_sent += 1;
        Outgoing {
            bytes,
            timer: Some(TimerCommand::Arm {
                seq,
                generation,
                after: self.arm_after(tuning),
            }),
        }
    }

    /// An untracked acknowledgement of the peer's latest control segment.
    fn pure_ack(&mut self, clock: &Clock) -> Outgoing {
        let segment = Segment::new(
            self.next_seq,
            self.peer_ack,
            flags::ACK,
            Vec::new(),
            clock.now_nanos(),
        );
        self.stats.segments_sent += 1;
        Outgoing {
            bytes: segment.encode(),
            timer: None,
        }
    }

    /// Emit FIN once the last data segment is queued and everything before
    /// it has been acknowledged.
    fn maybe_fin(&mut self, clock: &Clock, tuning: &Tuning) -> Option<Outgoing> {
        if !self.final_queued || !self.window.is_empty() {
            return None;
        }
        let next = self.state.on(Role::Sender, Event::FinSent)?;
        self.state = next;
        log::debug!("[snd] window drained; → FIN seq={}", self.next_seq);
        Some(self.track(flags::FIN, Vec::new(), clock, tuning))
    }

    /// Re-send `seq` if it is still outstanding, enforcing the
    /// retransmission cap.
    fn retransmit(&mut self, seq: u32, clock: &Clock, tuning: &Tuning) -> Result<Option<Outgoing>> {
        let Some(entry) = self.window.get(seq) else {
            return Ok(None);
        };
        if entry.attempts >= tuning.max_retransmissions {
            return Err(Error::RetransmitLimit {
                seq,
                attempts: entry.attempts + 1,
            });
        }
        let Some(r) = self.window.retransmit(seq, clock.now_nanos()) else {
            return Ok(None);
        };
        self.stats.retransmissions += 1;
        self.stats.segments_sent += 1;
        log::debug!("[snd] ↻ seq={} attempt={}", r.seq, r.attempts);
        Ok(Some(Outgoing {
            bytes: r.bytes,
            timer: Some(TimerCommand::Arm {
                seq: r.seq,
                generation: r.generation,
                after: self.arm_after(tuning),
            }),
        }))
    }

    /// Handle an expired timer; stale deadlines are ignored.
    fn on_timeout(&mut self, deadline: &Deadline, clock: &Clock, tuning: &Tuning) -> Result<Option<Outgoing>> {
        if !self.window.is_current(deadline.seq, deadline.generation) {
            return Ok(None);
        }
        log::debug!("[snd] RTO expired for seq={}", deadline.seq);
        self.retransmit(deadline.seq, clock, tuning)
    }

    /// Process one checksum-valid segment from the peer.
    fn on_segment(&mut self, segment: &Segment, clock: &Clock, tuning: &Tuning) -> Result<Reaction> {
        let h = &segment.header;
        let mut reaction = Reaction::default();
        self.stats.segments_received += 1;

        // A repeated SYN+ACK or FIN+ACK is not a duplicate data ACK.
        let control_repeat = (h.is_syn() || h.is_fin()) && h.ack == self.window.snd_una();
        if h.is_ack() && !control_repeat {
            match self.window.on_ack(h.ack) {
                AckOutcome::Advanced { acked } => {
                    self.rtt.observe(clock.sample_since(h.timestamp));
                    reaction.wake = true;
                    log::debug!(
                        "[snd] ← ACK ack={} released={} rto={:?}",
                        h.ack,
                        acked,
                        self.rtt.timeout()
                    );
                }
                AckOutcome::Duplicate { count } => {
                    self.stats.duplicate_acks += 1;
                    log::debug!("[snd] ← dup ACK ack={} (#{})", h.ack, count);
                }
                AckOutcome::FastRetransmit { seq } => {
                    self.stats.duplicate_acks += 1;
                    log::debug!("[snd] ← dup ACK ack={}; fast retransmit seq={}", h.ack, seq);
                    if let Some(out) = self.retransmit(seq, clock, tuning)? {
                        reaction.outgoing.push(out);
                    }
                }
                AckOutcome::Ignored => {}
            }
        }

        if h.is_syn() {
            self.peer_ack = h.seq.wrapping_add(1);
            if let Some(next) = self.state.on(Role::Sender, Event::SynReceived) {
                self.state = next;
                reaction.wake = true;
                log::info!("[snd] connection established");
            }
            reaction.outgoing.push(self.pure_ack(clock));
        }

        if h.is_fin() {
            self.peer_ack = h.seq.wrapping_add(1);
            if let Some(next) = self.state.on(Role::Sender, Event::FinReceived) {
                self.state = next;
                let linger = tuning.linger.duration(self.arm_after(tuning));
                log::debug!("[snd] ← FIN+ACK; lingering for {:?}", linger);
                reaction.linger = Some(linger);
            }
            reaction.outgoing.push(self.pure_ack(clock));
        }

        if let Some(fin) = self.maybe_fin(clock, tuning) {
            reaction.outgoing.push(fin);
        }
        Ok(reaction)
    }
}

/// State shared by the sender's tasks.
struct Shared {
    core: Mutex<SenderCore>,
    socket: Arc<Socket>,
    peer: SocketAddr,
    clock: Clock,
    tracer: Tracer,
    tuning: Tuning,
    /// Signalled when the outbound path may be able to send again.
    window_open: Notify,
    /// Set once an outcome has been reported; every loop polls it.
    stopped: AtomicBool,
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Report the transfer outcome and ask every loop to wind down.
    fn finish(&self, done: &mpsc::Sender<Result<()>>, outcome: Result<()>) {
        self.stopped.store(true, Ordering::Release);
        self.window_open.notify_one();
        let _ = done.try_send(outcome);
    }

    async fn transmit(
        &self,
        out: Outgoing,
        timers: &mpsc::UnboundedSender<TimerCommand>,
    ) -> Result<()> {
        self.socket.send_to(&out.bytes, self.peer).await?;
        self.tracer.bytes(Direction::Send, &out.bytes);
        if let Some(cmd) = out.timer {
            // The scheduler outlives every caller; a closed channel only
            // happens during teardown.
            let _ = timers.send(cmd);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// The sending side of one transfer.
///
/// Reads `source_len` bytes from `source` and delivers them reliably to the
/// receiver at `peer`.
pub struct Sender<R> {
    socket: Arc<Socket>,
    peer: SocketAddr,
    source: R,
    source_len: u64,
    config: EndpointConfig,
}

impl<R> Sender<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Prepare a transfer; nothing is sent until [`Sender::run`].
    pub fn new(
        socket: Socket,
        peer: SocketAddr,
        source: R,
        source_len: u64,
        config: EndpointConfig,
    ) -> Result<Self> {
        if source_len > MAX_SOURCE_LEN {
            return Err(Error::config(format!(
                "source is {source_len} bytes; at most {MAX_SOURCE_LEN} fit in the sequence space"
            )));
        }
        Ok(Self {
            socket: Arc::new(socket),
            peer,
            source,
            source_len,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Run the transfer to completion.
    ///
    /// Returns once the teardown linger expires, or with the first fatal
    /// error.
    pub async fn run(&mut self) -> Result<TransferStats> {
        log::info!(
            "[snd] {} → {} ({} bytes, mtu={}, window={})",
            self.socket.local_addr,
            self.peer,
            self.source_len,
            self.config.mtu,
            self.config.window
        );
        let clock = Clock::new();
        let shared = Arc::new(Shared {
            core: Mutex::new(SenderCore::new(&self.config)),
            socket: Arc::clone(&self.socket),
            peer: self.peer,
            clock,
            tracer: Tracer::new(clock, self.config.trace),
            tuning: self.config.tuning.clone(),
            window_open: Notify::new(),
            stopped: AtomicBool::new(false),
        });

        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (done_tx, mut done_rx) = mpsc::channel::<Result<()>>(2);
        let scheduler = tokio::spawn(schedule(Arc::clone(&shared), timer_rx, done_tx.clone()));
        let inbound = tokio::spawn(receive(Arc::clone(&shared), timer_tx.clone(), done_tx));

        let early = tokio::select! {
            sent = self.outbound(&shared, &timer_tx) => sent.err().map(Err),
            done = done_rx.recv() => Some(done.unwrap_or(Err(Error::Aborted))),
        };
        let outcome = match early {
            Some(outcome) => outcome,
            None => done_rx.recv().await.unwrap_or(Err(Error::Aborted)),
        };

        shared.stopped.store(true, Ordering::Release);
        // The inbound task may be parked in `recv_from`.
        scheduler.abort();
        inbound.abort();
        if let Err(e) = outcome {
            log::error!("[snd] transfer failed: {e}");
            return Err(e);
        }

        let stats = shared.core.lock().stats.clone();
        log::info!(
            "[snd] done: {} bytes, {} retransmissions",
            stats.bytes,
            stats.retransmissions
        );
        Ok(stats)
    }

    /// Send SYN, then stream the source through the window.
    ///
    /// Returns once the last data segment (or, for an empty source, the FIN)
    /// has been handed to the socket.
    async fn outbound(
        &mut self,
        shared: &Shared,
        timers: &mpsc::UnboundedSender<TimerCommand>,
    ) -> Result<()> {
        let syn = {
            let mut core = shared.core.lock();
            core.state = ConnectionState::HandshakeSent;
            core.track(flags::SYN, Vec::new(), &shared.clock, &shared.tuning)
        };
        log::debug!("[snd] → SYN");
        shared.transmit(syn, timers).await?;

        let mut offset = 0u64;
        loop {
            if shared.is_stopped() {
                return Ok(());
            }
            let ready = {
                let core = shared.core.lock();
                core.state.is_open() && core.window.admit()
            };
            if !ready {
                shared.window_open.notified().await;
                continue;
            }

            let len = (self.source_len - offset).min(self.config.mtu as u64) as usize;
            let mut payload = vec![0u8; len];
            self.source
                .read_exact(&mut payload)
                .await
                .map_err(Error::SourceRead)?;
            offset += len as u64;
            let last = offset == self.source_len;

            let (data, fin) = {
                let mut core = shared.core.lock();
                let data = if len > 0 {
                    core.stats.bytes += len as u64;
                    Some(core.track(flags::ACK, payload, &shared.clock, &shared.tuning))
                } else {
                    None
                };
                core.final_queued = last;
                (data, core.maybe_fin(&shared.clock, &shared.tuning))
            };
            for out in data.into_iter().chain(fin) {
                shared.transmit(out, timers).await?;
            }
            if last {
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Inbound task: consume ACKs and the peer's control segments.
async fn receive(
    shared: Arc<Shared>,
    timers: mpsc::UnboundedSender<TimerCommand>,
    done: mpsc::Sender<Result<()>>,
) {
    if let Err(e) = receive_loop(&shared, &timers).await {
        shared.finish(&done, Err(e));
    }
}

async fn receive_loop(
    shared: &Shared,
    timers: &mpsc::UnboundedSender<TimerCommand>,
) -> Result<()> {
    while !shared.is_stopped() {
        let (datagram, from) = shared.socket.recv_from().await?;
        if from != shared.peer {
            log::debug!("[snd] ignoring datagram from {from}");
            continue;
        }
        let segment = match Segment::decode(&datagram) {
            Ok(decoded) if decoded.checksum_valid => decoded.segment,
            _ => {
                shared.core.lock().stats.checksum_failures += 1;
                log::debug!("[snd] discarding corrupt datagram ({} bytes)", datagram.len());
                continue;
            }
        };
        shared.tracer.header(Direction::Receive, &segment.header);

        let reaction = {
            let mut core = shared.core.lock();
            core.on_segment(&segment, &shared.clock, &shared.tuning)?
        };
        if reaction.wake {
            shared.window_open.notify_one();
        }
        if let Some(after) = reaction.linger {
            let _ = timers.send(TimerCommand::Linger { after });
        }
        for out in reaction.outgoing {
            shared.transmit(out, timers).await?;
        }
    }
    Ok(())
}

/// Scheduler task: owns every retransmission deadline and the linger timer.
async fn schedule(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<TimerCommand>,
    done: mpsc::Sender<Result<()>>,
) {
    let mut queue = RetransmitQueue::new();
    let mut linger_until: Option<Instant> = None;

    while !shared.is_stopped() {
        let next = match (queue.next_deadline(), linger_until) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        tokio::select! {
            cmd = commands.recv() => match cmd {
                Some(TimerCommand::Arm { seq, generation, after }) => {
                    queue.arm(seq, generation, Instant::now() + after);
                }
                Some(TimerCommand::Linger { after }) => {
                    linger_until.get_or_insert(Instant::now() + after);
                }
                None => return,
            },
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                if linger_until.is_some_and(|at| at <= now) {
                    shared.core.lock().state = ConnectionState::Closed;
                    log::debug!("[snd] linger expired; closed");
                    shared.finish(&done, Ok(()));
                    return;
                }
                while let Some(deadline) = queue.pop_expired(now) {
                    let fired = {
                        let mut core = shared.core.lock();
                        core.on_timeout(&deadline, &shared.clock, &shared.tuning)
                    };
                    let out = match fired {
                        Ok(Some(out)) => out,
                        Ok(None) => continue,
                        Err(e) => {
                            shared.finish(&done, Err(e));
                            return;
                        }
                    };
                    if let Err(e) = shared.socket.send_to(&out.bytes, shared.peer).await {
                        shared.finish(&done, Err(e));
                        return;
                    }
                    shared.tracer.bytes(Direction::Send, &out.bytes);
                    if let Some(TimerCommand::Arm { seq, generation, after }) = out.timer {
                        queue.arm(seq, generation, Instant::now() + after);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
