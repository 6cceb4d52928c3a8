//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between the two endpoints is a [`Segment`].  This
//! module is responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`] and reporting
//!   whether its checksum verified.
//! - Re-stamping an already encoded segment before a retransmission.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                                                               |
//! +                           Timestamp                           +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Length                          |S|F|A|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           All Zeros           |           Checksum            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 24 bytes.
//! seq(4) + ack(4) + timestamp(8) + length/flags(4) + zeros(2) + checksum(2)

/// Bit-flag constants packed into the low three bits of the length word.
pub mod flags {
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0001;
    /// Finish: the sender has no more data to send.
    pub const FIN: u8 = 0b0000_0010;
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: u8 = 0b0000_0100;

    /// All defined flag bits.
    pub const MASK: u8 = SYN | FIN | ACK;
}

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 24;

/// Number of low bits of the length word occupied by flags.
const FLAG_BITS: u32 = 3;

// Byte offsets of each field within the serialised header.
const OFF_SEQ: usize = 0;
const OFF_ACK: usize = 4;
const OFF_TIMESTAMP: usize = 8;
const OFF_LEN_FLAGS: usize = 16;
const OFF_CHECKSUM: usize = 22;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Segment::encode`] converts to big-endian
/// on the wire and [`Segment::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Byte offset of the first payload byte, or the control placeholder for
    /// SYN / FIN segments.
    pub seq: u32,
    /// Next byte the sender of this segment expects from its peer.
    pub ack: u32,
    /// Monotonic clock sample taken at send time, echoed back by the peer.
    pub timestamp: u64,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Length of the payload in bytes.
    ///
    /// On encode this is computed from the actual payload length.
    pub payload_len: u32,
    /// Internet checksum over the entire serialised segment.
    ///
    /// On encode this is computed and written last.
    pub checksum: u16,
}

impl Header {
    pub fn is_syn(&self) -> bool {
        self.flags & flags::SYN != 0
    }

    pub fn is_fin(&self) -> bool {
        self.flags & flags::FIN != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

/// Result of [`Segment::decode`].
///
/// `checksum_valid` must be checked before any other field is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub segment: Segment,
    pub checksum_valid: bool,
}

impl Segment {
    /// Build a segment; `payload_len` and `checksum` are filled in by
    /// [`Segment::encode`].
    pub fn new(seq: u32, ack: u32, flags: u8, payload: Vec<u8>, timestamp: u64) -> Self {
        Self {
            header: Header {
                seq,
                ack,
                timestamp,
                flags: flags & flags::MASK,
                payload_len: payload.len() as u32,
                checksum: 0,
            },
            payload,
        }
    }

    /// Number of sequence numbers this segment consumes.
    ///
    /// Data consumes one per byte; a bare SYN or FIN consumes one.
    pub fn seq_len(&self) -> u32 {
        if !self.payload.is_empty() {
            self.payload.len() as u32
        } else if self.header.is_syn() || self.header.is_fin() {
            1
        } else {
            0
        }
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// `header.payload_len` and `header.checksum` are computed from the actual
    /// payload; any values already stored in those fields are ignored.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.len();
        let mut buf = vec![0u8; HEADER_LEN + payload_len];

        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8]
            .copy_from_slice(&self.header.timestamp.to_be_bytes());

        let len_flags =
            ((payload_len as u32) << FLAG_BITS) | u32::from(self.header.flags & flags::MASK);
        buf[OFF_LEN_FLAGS..OFF_LEN_FLAGS + 4].copy_from_slice(&len_flags.to_be_bytes());
        // Reserved and checksum fields stay zero while computing the checksum.
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        let csum = internet_checksum(&buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());

        buf
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`], or
    /// - the length field disagrees with `buf.len()`.
    ///
    /// A checksum mismatch is *not* an error here; it is reported through
    /// [`Decoded::checksum_valid`].
    pub fn decode(buf: &[u8]) -> Result<Decoded, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::BufferTooShort);
        }

        let seq = read_u32(buf, OFF_SEQ);
        let ack = read_u32(buf, OFF_ACK);
        let timestamp = read_u64(buf, OFF_TIMESTAMP);
        let len_flags = read_u32(buf, OFF_LEN_FLAGS);
        let checksum = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);

        let payload_len = len_flags >> FLAG_BITS;
        if buf.len() - HEADER_LEN != payload_len as usize {
            return Err(PacketError::LengthMismatch);
        }

        Ok(Decoded {
            segment: Segment {
                header: Header {
                    seq,
                    ack,
                    timestamp,
                    flags: (len_flags as u8) & flags::MASK,
                    payload_len,
                    checksum,
                },
                payload: buf[HEADER_LEN..].to_vec(),
            },
            checksum_valid: verify_checksum(buf),
        })
    }
}

/// Overwrite the timestamp of an already encoded segment and recompute its
/// checksum in place.  The payload is left untouched.
pub fn restamp(buf: &mut [u8], timestamp: u64) {
    debug_assert!(buf.len() >= HEADER_LEN, "restamp on a truncated segment");
    buf[OFF_TIMESTAMP..OFF_TIMESTAMP + 8].copy_from_slice(&timestamp.to_be_bytes());
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
    let csum = internet_checksum(buf);
    buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    BufferTooShort,
    /// Length field does not match the actual remaining bytes.
    LengthMismatch,
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketError::BufferTooShort => write!(f, "buffer too short to contain a header"),
            PacketError::LengthMismatch => {
                write!(f, "length field does not match remaining bytes")
            }
        }
    }
}

impl std::error::Error for PacketError {}

/// Compute the Internet checksum over `data`.
///
/// Sum consecutive 16-bit big-endian words, fold the carry, return the
/// one's-complement.  The caller must zero any checksum field within `data`
/// before calling this function.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);

    for word in &mut chunks {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
        // Fold early so the accumulator never overflows on large payloads.
        if sum > 0xffff {
            sum = (sum & 0xffff) + (sum >> 16);
        }
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let [last] = chunks.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Verify the checksum of an encoded segment (checksum field zeroed for the
/// computation, then compared to the stored value).
fn verify_checksum(buf: &[u8]) -> bool {
    let stored = u16::from_be_bytes([buf[OFF_CHECKSUM], buf[OFF_CHECKSUM + 1]]);
    let mut scratch = buf.to_vec();
    scratch[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&[0, 0]);
    internet_checksum(&scratch) == stored
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_be_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(word)
}
