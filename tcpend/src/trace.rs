//! Per-segment trace lines.
//!
//! Every segment an endpoint sends or accepts is reported on stdout as
//!
//! ```text
//! <snd|rcv> <elapsed-seconds> <S|-> <A|-> <F|-> <D|-> <seq> <length> <ack>
//! ```
//!
//! External tooling parses these lines, so the format is fixed.  Diagnostic
//! output goes through `log` instead.

use std::time::Duration;

use crate::packet::{Header, Segment};
use crate::timer::Clock;

/// Direction of a traced segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Send => "snd",
            Direction::Receive => "rcv",
        }
    }
}

/// Render one trace line.
pub fn format_line(direction: Direction, elapsed: Duration, header: &Header) -> String {
    let mark = |set: bool, c: char| if set { c } else { '-' };
    format!(
        "{} {:.3} {} {} {} {} {} {} {}",
        direction.tag(),
        elapsed.as_secs_f64(),
        mark(header.is_syn(), 'S'),
        mark(header.is_ack(), 'A'),
        mark(header.is_fin(), 'F'),
        mark(header.payload_len > 0, 'D'),
        header.seq,
        header.payload_len,
        header.ack,
    )
}

/// Writes trace lines relative to an endpoint's clock.
#[derive(Debug, Clone, Copy)]
pub struct Tracer {
    clock: Clock,
    enabled: bool,
}

impl Tracer {
    pub fn new(clock: Clock, enabled: bool) -> Self {
        Self { clock, enabled }
    }

    pub fn header(&self, direction: Direction, header: &Header) {
        if self.enabled {
            println!("{}", format_line(direction, self.clock.elapsed(), header));
        }
    }

    /// Trace an already encoded segment (used for retransmissions).
    pub fn bytes(&self, direction: Direction, bytes: &[u8]) {
        if !self.enabled {
            return;
        }
        if let Ok(decoded) = Segment::decode(bytes) {
            self.header(direction, &decoded.segment.header);
        }
    }
}
