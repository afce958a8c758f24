//! sdrio wire format — the streaming frame exchanged with the radio.
//!
//! These types ARE the protocol. Every field, every size, every reserved byte
//! is part of the wire format. A frame is a 24-byte header followed by
//! `sample_count` sc16 sample words.
//!
//! All header integers are little-endian and the header derives zerocopy
//! traits for allocation-free parsing. There is no unsafe code in this
//! module.

use bytes::{BufMut, Bytes, BytesMut};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── Frame Header ─────────────────────────────────────────────────────────────

/// Fixed header preceding every streaming frame.
///
/// Wire size: 24 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct FrameHeader {
    /// Wire format version. Currently 0x01.
    pub version: u8,

    /// Bit flags:
    ///   bit 0: timestamp field is valid
    ///   bit 1: last frame of a transmit burst
    ///   bits 2-7: reserved, must be zero
    pub flags: u8,

    /// Condition reported by the hardware for this frame, see [`ErrorCode`].
    pub error_code: u8,

    /// Reserved, must be zero.
    pub reserved: u8,

    /// Identifies the radio path this frame belongs to.
    pub stream_id: U32<LittleEndian>,

    /// Per-stream frame counter. Wraps at `u32::MAX`.
    pub sequence: U32<LittleEndian>,

    /// Number of sc16 words following the header.
    pub sample_count: U16<LittleEndian>,

    /// Reserved, must be zero.
    pub reserved2: [u8; 2],

    /// Device time of the first sample, in ticks.
    pub timestamp: U64<LittleEndian>,
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(FrameHeader, [u8; 24]);

// ── Error codes ───────────────────────────────────────────────────────────────

/// Hardware condition carried in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    None = 0x00,
    /// Transmit path ran out of samples mid-burst.
    Underflow = 0x01,
    /// Receive path dropped samples because the host fell behind.
    Overflow = 0x02,
    /// The device saw a sequence gap on a transmit stream.
    SequenceError = 0x03,
    /// A timed command arrived after its execution time.
    LateCommand = 0x04,
    /// A transmit burst completed.
    BurstAck = 0x05,
}

impl TryFrom<u8> for ErrorCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(ErrorCode::None),
            0x01 => Ok(ErrorCode::Underflow),
            0x02 => Ok(ErrorCode::Overflow),
            0x03 => Ok(ErrorCode::SequenceError),
            0x04 => Ok(ErrorCode::LateCommand),
            0x05 => Ok(ErrorCode::BurstAck),
            other => Err(WireError::UnknownErrorCode(other)),
        }
    }
}

impl From<ErrorCode> for u8 {
    fn from(c: ErrorCode) -> u8 {
        c as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Current frame format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Header flag: `timestamp` is valid.
pub const FLAG_HAS_TIMESTAMP: u8 = 0x01;

/// Header flag: final frame of a transmit burst.
pub const FLAG_END_OF_BURST: u8 = 0x02;

const RESERVED_FLAGS: u8 = !(FLAG_HAS_TIMESTAMP | FLAG_END_OF_BURST);

/// Size of [`FrameHeader`] on the wire.
pub const HEADER_SIZE: usize = 24;

/// Bytes per sc16 sample word.
pub const SAMPLE_SIZE: usize = 4;

/// Largest frame the link carries, header included.
pub const MAX_FRAME_SIZE: usize = 8000;

/// Largest payload that fits in [`MAX_FRAME_SIZE`].
pub const MAX_SAMPLES_PER_FRAME: usize = (MAX_FRAME_SIZE - HEADER_SIZE) / SAMPLE_SIZE;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// A decoded streaming frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    pub stream_id: u32,
    pub sequence: u32,
    /// Only meaningful when `has_timestamp` is set.
    pub timestamp: u64,
    pub has_timestamp: bool,
    pub end_of_burst: bool,
    pub error_code: ErrorCode,
    /// sc16 words, I in the high half, Q in the low half.
    pub payload: Vec<u32>,
}

impl Frame {
    /// Build the on-wire header for this frame.
    pub fn header(&self) -> Result<FrameHeader, WireError> {
        if self.payload.len() > MAX_SAMPLES_PER_FRAME {
            return Err(WireError::PayloadTooLarge(self.payload.len()));
        }

        let mut flags = 0;
        if self.has_timestamp {
            flags |= FLAG_HAS_TIMESTAMP;
        }
        if self.end_of_burst {
            flags |= FLAG_END_OF_BURST;
        }

        Ok(FrameHeader {
            version: WIRE_VERSION,
            flags,
            error_code: self.error_code.into(),
            reserved: 0,
            stream_id: U32::new(self.stream_id),
            sequence: U32::new(self.sequence),
            sample_count: U16::new(self.payload.len() as u16),
            reserved2: [0; 2],
            timestamp: U64::new(if self.has_timestamp { self.timestamp } else { 0 }),
        })
    }

    /// Serialize header and payload into one contiguous buffer.
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len() * SAMPLE_SIZE);
        buf.put_slice(header.as_bytes());
        for word in &self.payload {
            buf.put_u32_le(*word);
        }
        Ok(buf.freeze())
    }

    /// Parse a frame received from the link.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header =
            FrameHeader::read_from_prefix(bytes).ok_or(WireError::Truncated(bytes.len()))?;

        if header.version != WIRE_VERSION {
            return Err(WireError::UnknownVersion(header.version));
        }
        if header.flags & RESERVED_FLAGS != 0 {
            return Err(WireError::ReservedFlagsSet(header.flags));
        }
        if header.reserved != 0 || header.reserved2 != [0; 2] {
            return Err(WireError::ReservedFieldSet);
        }
        let error_code = ErrorCode::try_from(header.error_code)?;

        let declared = header.sample_count.get() as usize;
        if declared > MAX_SAMPLES_PER_FRAME {
            return Err(WireError::PayloadTooLarge(declared));
        }
        let body = &bytes[HEADER_SIZE..];
        if body.len() != declared * SAMPLE_SIZE {
            return Err(WireError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let payload = body
            .chunks_exact(SAMPLE_SIZE)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();

        let has_timestamp = header.flags & FLAG_HAS_TIMESTAMP != 0;
        Ok(Frame {
            stream_id: header.stream_id.get(),
            sequence: header.sequence.get(),
            timestamp: header.timestamp.get(),
            has_timestamp,
            end_of_burst: header.flags & FLAG_END_OF_BURST != 0,
            error_code,
            payload,
        })
    }

    pub fn num_samples(&self) -> usize {
        self.payload.len()
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame too short: {0} bytes, header alone is {}", HEADER_SIZE)]
    Truncated(usize),

    #[error("unknown frame version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("reserved flags are non-zero: 0x{0:02x}")]
    ReservedFlagsSet(u8),

    #[error("reserved header bytes are non-zero")]
    ReservedFieldSet,

    #[error("unknown error code: 0x{0:02x}")]
    UnknownErrorCode(u8),

    #[error("payload of {0} samples exceeds maximum {}", MAX_SAMPLES_PER_FRAME)]
    PayloadTooLarge(usize),

    #[error("header declares {declared} samples but body holds {actual} bytes")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("frame for stream 0x{received:08x} arrived on stream 0x{expected:08x}")]
    ForeignStream { expected: u32, received: u32 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────
