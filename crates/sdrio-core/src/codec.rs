//! Per-stream packet codec — sequence stamping on send, continuity checks
//! on receive.
//!
//! The protocol has no retransmission. A gap is reported to the caller,
//! who turns it into an async event; the codec resynchronizes on the
//! received sequence number and the stream keeps flowing.

use bytes::Bytes;

use crate::wire::{ErrorCode, Frame, WireError, MAX_SAMPLES_PER_FRAME};

/// Result of checking a received frame against the expected sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    InOrder,
    Gap { expected: u32, received: u32 },
}

/// Sequencing state for one stream id.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    stream_id: u32,
    next_send: u32,
    expected_recv: Option<u32>,
}

impl PacketCodec {
    pub fn new(stream_id: u32) -> Self {
        Self {
            stream_id,
            next_send: 0,
            expected_recv: None,
        }
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Sequence number the next outgoing frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_send
    }

    /// Stamp a new outgoing frame with this stream's id and the next
    /// sequence number.
    pub fn next_frame(
        &mut self,
        payload: Vec<u32>,
        timestamp: Option<u64>,
        end_of_burst: bool,
    ) -> Result<Frame, WireError> {
        if payload.len() > MAX_SAMPLES_PER_FRAME {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        let frame = Frame {
            stream_id: self.stream_id,
            sequence: self.next_send,
            timestamp: timestamp.unwrap_or(0),
            has_timestamp: timestamp.is_some(),
            end_of_burst,
            error_code: ErrorCode::None,
            payload,
        };
        self.next_send = self.next_send.wrapping_add(1);
        Ok(frame)
    }

    /// Stamp and serialize in one step.
    pub fn encode(
        &mut self,
        payload: Vec<u32>,
        timestamp: Option<u64>,
        end_of_burst: bool,
    ) -> Result<Bytes, WireError> {
        self.next_frame(payload, timestamp, end_of_burst)?.encode()
    }

    /// Check a received frame belongs to this stream and continues its
    /// sequence. Wrapping from `u32::MAX` to 0 is a normal continuation.
    pub fn accept(&mut self, frame: &Frame) -> Result<SequenceCheck, WireError> {
        if frame.stream_id != self.stream_id {
            return Err(WireError::ForeignStream {
                expected: self.stream_id,
                received: frame.stream_id,
            });
        }

        let check = match self.expected_recv {
            Some(expected) if expected != frame.sequence => SequenceCheck::Gap {
                expected,
                received: frame.sequence,
            },
            _ => SequenceCheck::InOrder,
        };
        self.expected_recv = Some(frame.sequence.wrapping_add(1));
        Ok(check)
    }

    /// Decode raw bytes and run the continuity check.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(Frame, SequenceCheck), WireError> {
        let frame = Frame::decode(bytes)?;
        let check = self.accept(&frame)?;
        Ok((frame, check))
    }
}
