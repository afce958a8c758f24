//! One channel's end of a stream: framing, sample conversion, timestamp
//! tracking and event reporting on top of an exclusively owned transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sdrio_core::sample::{from_sc16, to_sc16};
use sdrio_core::{Direction, Frame, Iq, PacketCodec, SequenceCheck};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Result, StreamError};
use crate::events::{AsyncEvent, AsyncEventKind, AsyncEventQueue};
use crate::registry::BlockId;
use crate::timekeeper::Timekeeper;
use crate::transport::{Recv, Transport};

/// Status frames drained from a transmit link after each send.
const MAX_STATUS_FRAMES: usize = 16;

/// Rate and scale cell shared between an endpoint and the rate manager.
/// Stored as `f64` bit patterns so updates never wait on in-flight I/O.
#[derive(Debug)]
pub struct StreamRates {
    tick_rate: AtomicU64,
    samp_rate: AtomicU64,
    scale_factor: AtomicU64,
}

impl StreamRates {
    pub fn new(tick_rate: f64, samp_rate: f64, scale_factor: f64) -> Self {
        Self {
            tick_rate: AtomicU64::new(tick_rate.to_bits()),
            samp_rate: AtomicU64::new(samp_rate.to_bits()),
            scale_factor: AtomicU64::new(scale_factor.to_bits()),
        }
    }

    pub fn tick_rate(&self) -> f64 {
        f64::from_bits(self.tick_rate.load(Ordering::Acquire))
    }

    pub fn set_tick_rate(&self, rate: f64) {
        self.tick_rate.store(rate.to_bits(), Ordering::Release);
    }

    pub fn samp_rate(&self) -> f64 {
        f64::from_bits(self.samp_rate.load(Ordering::Acquire))
    }

    pub fn set_samp_rate(&self, rate: f64) {
        self.samp_rate.store(rate.to_bits(), Ordering::Release);
    }

    pub fn scale_factor(&self) -> f64 {
        f64::from_bits(self.scale_factor.load(Ordering::Acquire))
    }

    pub fn set_scale_factor(&self, scale: f64) {
        self.scale_factor.store(scale.to_bits(), Ordering::Release);
    }

    /// Device ticks spanned by `samples` at the current rates.
    pub fn ticks_for(&self, samples: usize) -> u64 {
        let samp = self.samp_rate();
        if samp <= 0.0 {
            return 0;
        }
        (samples as f64 * self.tick_rate() / samp).round() as u64
    }
}

/// One received frame, converted to application units.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RxBlock {
    pub samples: Vec<Iq>,
    /// Device time of the first sample. Frames without a timestamp inherit
    /// the time predicted from the previous frame.
    pub timestamp: Option<u64>,
    pub end_of_burst: bool,
    pub out_of_sequence: bool,
}

/// Shared pieces every endpoint of a streamer is built from.
#[derive(Clone)]
pub struct EndpointContext {
    pub events: AsyncEventQueue,
    pub timekeeper: Arc<Timekeeper>,
    pub shutdown: watch::Receiver<bool>,
    pub samples_per_frame: usize,
}

pub struct ChannelEndpoint {
    channel: usize,
    block: BlockId,
    transport: Box<dyn Transport>,
    codec: PacketCodec,
    rates: Arc<StreamRates>,
    next_timestamp: Option<u64>,
    events: AsyncEventQueue,
    timekeeper: Arc<Timekeeper>,
    shutdown: watch::Receiver<bool>,
    samples_per_frame: usize,
}

impl ChannelEndpoint {
    pub fn new(
        channel: usize,
        block: BlockId,
        direction: Direction,
        transport: Box<dyn Transport>,
        rates: Arc<StreamRates>,
        ctx: EndpointContext,
    ) -> Self {
        Self {
            channel,
            block,
            transport,
            codec: PacketCodec::new(block.stream_id(direction)),
            rates,
            next_timestamp: None,
            events: ctx.events,
            timekeeper: ctx.timekeeper,
            shutdown: ctx.shutdown,
            samples_per_frame: ctx.samples_per_frame.max(1),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn stream_id(&self) -> u32 {
        self.codec.stream_id()
    }

    pub fn rates(&self) -> &Arc<StreamRates> {
        &self.rates
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Frame and send `samples`. The first frame carries `timestamp`, the
    /// last carries `end_of_burst`. Returns the number of samples sent.
    ///
    /// A timestamp already in the past raises a late-command event and
    /// drops the burst; the call itself succeeds with 0 samples sent.
    pub async fn push_send(
        &mut self,
        samples: &[Iq],
        end_of_burst: bool,
        timestamp: Option<u64>,
    ) -> Result<usize> {
        if self.is_shut_down() {
            return Err(StreamError::TransportClosed {
                channel: self.channel,
            });
        }

        if let Some(ts) = timestamp {
            let now = self.timekeeper.now_ticks();
            if ts < now {
                tracing::warn!(
                    channel = self.channel,
                    block = %self.block,
                    ts,
                    now,
                    "late command, burst dropped"
                );
                self.events.push(AsyncEvent {
                    channel: self.channel,
                    kind: AsyncEventKind::LateCommand,
                    timestamp: Some(now),
                });
                return Ok(0);
            }
        }

        let scale = self.rates.scale_factor();
        let mut chunks: Vec<&[Iq]> = samples.chunks(self.samples_per_frame).collect();
        if chunks.is_empty() {
            // An empty burst still has to deliver its end-of-burst marker.
            chunks.push(&[]);
        }
        let last = chunks.len() - 1;

        for (idx, chunk) in chunks.into_iter().enumerate() {
            let payload = chunk.iter().map(|s| to_sc16(*s, scale)).collect();
            let ts = if idx == 0 { timestamp } else { None };
            let bytes = self.codec.encode(payload, ts, end_of_burst && idx == last)?;
            tracing::trace!(
                channel = self.channel,
                seq = self.codec.next_sequence().wrapping_sub(1),
                len = bytes.len(),
                "frame out"
            );

            let sent = tokio::select! {
                ok = self.transport.send(bytes) => ok,
                _ = self.shutdown.changed() => false,
            };
            if !sent {
                return Err(StreamError::TransportClosed {
                    channel: self.channel,
                });
            }
        }

        self.poll_status().await;
        Ok(samples.len())
    }

    /// Forward status frames the device sent back on a transmit link
    /// (underflow, burst ack, ...) to the event queue without waiting.
    async fn poll_status(&mut self) {
        for _ in 0..MAX_STATUS_FRAMES {
            let bytes = match self.transport.recv(Duration::ZERO).await {
                Recv::Frame(bytes) => bytes,
                Recv::Timeout | Recv::Closed => return,
            };
            match self.codec.decode(&bytes) {
                Ok((frame, _)) => self.forward_error_code(&frame),
                Err(e) => self.discard(&bytes, &e),
            }
        }
    }

    /// Receive one frame within `timeout`. Frames for another stream or
    /// frames that fail to decode are dropped and the wait continues.
    pub async fn pull_recv(&mut self, timeout: Duration) -> Result<RxBlock> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_shut_down() {
                return Err(StreamError::TransportClosed {
                    channel: self.channel,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());

            let received = tokio::select! {
                r = self.transport.recv(remaining) => r,
                _ = self.shutdown.changed() => Recv::Closed,
            };
            let bytes = match received {
                Recv::Frame(bytes) => bytes,
                Recv::Timeout => return Err(StreamError::Timeout),
                Recv::Closed => {
                    return Err(StreamError::TransportClosed {
                        channel: self.channel,
                    })
                }
            };

            match self.codec.decode(&bytes) {
                Ok((frame, check)) => return Ok(self.accept(frame, check)),
                Err(e) => {
                    self.discard(&bytes, &e);
                    if remaining.is_zero() {
                        return Err(StreamError::Timeout);
                    }
                }
            }
        }
    }

    fn accept(&mut self, frame: Frame, check: SequenceCheck) -> RxBlock {
        let frame_ts = frame.has_timestamp.then_some(frame.timestamp);

        let out_of_sequence = match check {
            SequenceCheck::InOrder => false,
            SequenceCheck::Gap { expected, received } => {
                tracing::warn!(
                    channel = self.channel,
                    stream_id = self.codec.stream_id(),
                    expected,
                    received,
                    "sequence gap"
                );
                self.events.push(AsyncEvent {
                    channel: self.channel,
                    kind: AsyncEventKind::SequenceError,
                    timestamp: frame_ts,
                });
                true
            }
        };
        self.forward_error_code(&frame);

        let timestamp = frame_ts.or(self.next_timestamp);
        let n = frame.num_samples();
        self.next_timestamp = timestamp.map(|ts| ts.wrapping_add(self.rates.ticks_for(n)));

        let scale = self.rates.scale_factor();
        RxBlock {
            samples: frame.payload.iter().map(|w| from_sc16(*w, scale)).collect(),
            timestamp,
            end_of_burst: frame.end_of_burst,
            out_of_sequence,
        }
    }

    fn forward_error_code(&self, frame: &Frame) {
        if let Some(kind) = AsyncEventKind::from_error_code(frame.error_code) {
            self.events.push(AsyncEvent {
                channel: self.channel,
                kind,
                timestamp: frame.has_timestamp.then_some(frame.timestamp),
            });
        }
    }

    fn discard(&self, bytes: &[u8], error: &sdrio_core::WireError) {
        tracing::warn!(
            channel = self.channel,
            block = %self.block,
            error = %error,
            head = %hex::encode(&bytes[..bytes.len().min(16)]),
            "discarding frame"
        );
    }
}

impl std::fmt::Debug for ChannelEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelEndpoint")
            .field("channel", &self.channel)
            .field("block", &self.block)
            .field("stream_id", &self.codec.stream_id())
            .field("next_timestamp", &self.next_timestamp)
            .finish()
    }
}
