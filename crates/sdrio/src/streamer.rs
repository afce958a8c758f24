//! Stream aggregator: presents N channel endpoints as one multi-channel
//! streamer.
//!
//! Every aggregated call drives all channels concurrently and joins them.
//! A call either succeeds on every channel or fails as a whole.
//!
//! Receive pulls are joined in place rather than spawned, and a pulled
//! block stays pending on its channel until a call hands it out. A call
//! that fails on some channels, or is dropped mid-flight, leaves the
//! blocks of the others for the next call.

use std::sync::Arc;
use std::time::Duration;

use sdrio_core::{Direction, Iq};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use crate::endpoint::{ChannelEndpoint, RxBlock, StreamRates};
use crate::error::{Result, StreamError};
use crate::registry::BlockId;

/// Per-call transmit metadata, applied to every channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxMetadata {
    /// Device time of the first sample, in ticks. `None` sends immediately.
    pub time_spec: Option<u64>,
    pub end_of_burst: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxMetadata {
    /// Common device time of the first sample of every channel.
    pub timestamp: Option<u64>,
    pub end_of_burst: bool,
    /// At least one channel saw a sequence gap in this call.
    pub out_of_sequence: bool,
}

/// One channel's endpoint and the received block not yet handed out.
struct ChannelSlot {
    endpoint: ChannelEndpoint,
    pending: Option<RxBlock>,
}

struct Binding {
    channel: usize,
    block: BlockId,
    rates: Arc<StreamRates>,
}

/// State shared by all handles of one streamer.
pub struct StreamerCore {
    direction: Direction,
    slots: Vec<Arc<Mutex<ChannelSlot>>>,
    bindings: Vec<Binding>,
    shutdown: watch::Sender<bool>,
    align_attempts: usize,
    default_timeout: Duration,
}

impl StreamerCore {
    pub fn new(
        direction: Direction,
        endpoints: Vec<ChannelEndpoint>,
        shutdown: watch::Sender<bool>,
        align_attempts: usize,
        default_timeout: Duration,
    ) -> Arc<Self> {
        let bindings = endpoints
            .iter()
            .map(|ep| Binding {
                channel: ep.channel(),
                block: ep.block(),
                rates: ep.rates().clone(),
            })
            .collect();
        Arc::new(Self {
            direction,
            slots: endpoints
                .into_iter()
                .map(|endpoint| {
                    Arc::new(Mutex::new(ChannelSlot {
                        endpoint,
                        pending: None,
                    }))
                })
                .collect(),
            bindings,
            shutdown,
            align_attempts,
            default_timeout,
        })
    }

    #[cfg(test)]
    pub(crate) fn detached(direction: Direction) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Self::new(direction, Vec::new(), shutdown, 0, Duration::ZERO)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn num_channels(&self) -> usize {
        self.slots.len()
    }

    /// Timeout from the device configuration, for callers without their own.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Global channel numbers, in streamer order.
    pub fn channels(&self) -> Vec<usize> {
        self.bindings.iter().map(|b| b.channel).collect()
    }

    /// Distinct radio blocks this streamer is bound to, ascending.
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut blocks: Vec<_> = self.bindings.iter().map(|b| b.block).collect();
        blocks.sort();
        blocks.dedup();
        blocks
    }

    /// Rate cells of the channels bound to `block`.
    pub fn rates_for(&self, block: BlockId) -> impl Iterator<Item = &Arc<StreamRates>> {
        self.bindings
            .iter()
            .filter(move |b| b.block == block)
            .map(|b| &b.rates)
    }

    /// Rate cell of one channel, by position in this streamer.
    pub fn rates(&self, index: usize) -> Option<&Arc<StreamRates>> {
        self.bindings.get(index).map(|b| &b.rates)
    }

    pub fn set_tick_rate(&self, rate: f64) {
        self.bindings.iter().for_each(|b| b.rates.set_tick_rate(rate));
    }

    pub fn set_samp_rate(&self, rate: f64) {
        self.bindings.iter().for_each(|b| b.rates.set_samp_rate(rate));
    }

    pub fn set_scale_factor(&self, scale: f64) {
        self.bindings.iter().for_each(|b| b.rates.set_scale_factor(scale));
    }

    /// Unblock and fail every in-flight and future call.
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::debug!(direction = %self.direction, "streamer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Make sure every listed channel holds a pending block, pulling from
    /// the transport only where none is held yet.
    async fn fill(&self, indices: &[usize], timeout: Duration) -> Result<()> {
        let pulls = indices.iter().map(|&i| async move {
            let mut slot = self.slots[i].lock().await;
            if slot.pending.is_none() {
                let block = slot.endpoint.pull_recv(timeout).await?;
                slot.pending = Some(block);
            }
            Ok::<_, StreamError>(())
        });

        let mut failure: Option<StreamError> = None;
        for result in futures::future::join_all(pulls).await {
            if let Err(e) = result {
                keep_worst(&mut failure, e);
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Timestamps of the pending blocks, in channel order.
    async fn pending_timestamps(&self) -> Vec<Option<u64>> {
        let mut stamps = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            stamps.push(slot.lock().await.pending.as_ref().and_then(|b| b.timestamp));
        }
        stamps
    }

    /// Drop the pending blocks of `indices`; they start before the others.
    async fn discard_pending(&self, indices: &[usize]) {
        for &i in indices {
            let stale = self.slots[i].lock().await.pending.take();
            if let Some(block) = stale {
                tracing::debug!(
                    channel = self.bindings[i].channel,
                    timestamp = ?block.timestamp,
                    samples = block.samples.len(),
                    "dropping block older than its siblings"
                );
            }
        }
    }

    async fn take_pending(&self) -> Vec<RxBlock> {
        let mut blocks = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            blocks.push(slot.lock().await.pending.take().unwrap_or_default());
        }
        blocks
    }
}

/// Keep the error that best explains a failed aggregated call: a dead
/// transport outranks a timeout, otherwise the first error wins.
fn keep_worst(slot: &mut Option<StreamError>, err: StreamError) {
    let replace = match slot {
        None => true,
        Some(StreamError::Timeout) => !matches!(err, StreamError::Timeout),
        Some(_) => false,
    };
    if replace {
        *slot = Some(err);
    }
}

impl Drop for StreamerCore {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        tracing::debug!(
            direction = %self.direction,
            channels = self.slots.len(),
            "streamer dropped"
        );
    }
}

impl std::fmt::Debug for StreamerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamerCore")
            .field("direction", &self.direction)
            .field("channels", &self.channels())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ── Receive ───────────────────────────────────────────────────────────────────

/// Multi-channel receive handle. Clones share the same streamer.
#[derive(Debug, Clone)]
pub struct RxStreamer {
    core: Arc<StreamerCore>,
}

impl RxStreamer {
    pub(crate) fn from_core(core: Arc<StreamerCore>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<StreamerCore> {
        &self.core
    }

    pub fn num_channels(&self) -> usize {
        self.core.num_channels()
    }

    pub fn close(&self) {
        self.core.close();
    }

    /// Configured receive timeout.
    pub fn default_timeout(&self) -> Duration {
        self.core.default_timeout()
    }

    /// Receive one time-aligned block per channel into `buffs`.
    ///
    /// Each buffer is replaced by its channel's samples. Returns the sample
    /// count common to all channels. On any failure no buffer is touched
    /// and blocks already received stay queued for the next call.
    pub async fn recv(
        &self,
        buffs: &mut [Vec<Iq>],
        timeout: Duration,
    ) -> Result<(usize, RxMetadata)> {
        let n = self.core.num_channels();
        if buffs.len() != n {
            return Err(StreamError::BufferCount {
                expected: n,
                got: buffs.len(),
            });
        }
        let deadline = Instant::now() + timeout;
        let all: Vec<usize> = (0..n).collect();
        self.core.fill(&all, timeout).await?;

        let mut attempts = 0;
        loop {
            let lagging = lagging_channels(&self.core.pending_timestamps().await);
            if lagging.is_empty() {
                break;
            }
            if attempts == self.core.align_attempts {
                tracing::warn!(attempts, lagging = ?lagging, "channels failed to align");
                return Err(StreamError::Misaligned { attempts });
            }
            attempts += 1;
            tracing::debug!(attempt = attempts, lagging = ?lagging, "re-aligning channels");
            self.core.discard_pending(&lagging).await;
            let remaining = deadline.saturating_duration_since(Instant::now());
            self.core.fill(&lagging, remaining).await?;
        }

        let blocks = self.core.take_pending().await;
        let md = RxMetadata {
            timestamp: blocks.first().and_then(|b| b.timestamp),
            end_of_burst: blocks.iter().any(|b| b.end_of_burst),
            out_of_sequence: blocks.iter().any(|b| b.out_of_sequence),
        };
        let count = blocks.iter().map(|b| b.samples.len()).min().unwrap_or(0);
        for (buf, block) in buffs.iter_mut().zip(blocks) {
            *buf = block.samples;
        }
        Ok((count, md))
    }
}

/// Channels whose block starts before the newest block. Channels without a
/// timestamp cannot be aligned and are never reported.
fn lagging_channels(stamps: &[Option<u64>]) -> Vec<usize> {
    let Some(newest) = stamps.iter().flatten().copied().max() else {
        return Vec::new();
    };
    stamps
        .iter()
        .enumerate()
        .filter(|(_, ts)| ts.is_some_and(|ts| ts < newest))
        .map(|(i, _)| i)
        .collect()
}

// ── Transmit ──────────────────────────────────────────────────────────────────

/// Multi-channel transmit handle. Clones share the same streamer.
#[derive(Debug, Clone)]
pub struct TxStreamer {
    core: Arc<StreamerCore>,
}

impl TxStreamer {
    pub(crate) fn from_core(core: Arc<StreamerCore>) -> Self {
        Self { core }
    }

    pub fn core(&self) -> &Arc<StreamerCore> {
        &self.core
    }

    pub fn num_channels(&self) -> usize {
        self.core.num_channels()
    }

    pub fn close(&self) {
        self.core.close();
    }

    /// Configured send timeout.
    pub fn default_timeout(&self) -> Duration {
        self.core.default_timeout()
    }

    /// Send one buffer to every channel, or one buffer per channel, with
    /// the same metadata. Every channel is attempted; the first failure in
    /// channel order is returned. Returns samples sent per channel.
    pub async fn send(
        &self,
        buffs: &[&[Iq]],
        md: &TxMetadata,
        timeout: Duration,
    ) -> Result<usize> {
        let n = self.core.num_channels();
        let broadcast = buffs.len() == 1;
        if !broadcast && buffs.len() != n {
            return Err(StreamError::BufferCount {
                expected: n,
                got: buffs.len(),
            });
        }
        let shared: Vec<Arc<[Iq]>> = buffs.iter().map(|b| Arc::from(*b)).collect();

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let slot = self.core.slots[i].clone();
                let samples = shared[if broadcast { 0 } else { i }].clone();
                let md = *md;
                tokio::spawn(async move {
                    let work = async {
                        let mut slot = slot.lock().await;
                        slot.endpoint
                            .push_send(&samples, md.end_of_burst, md.time_spec)
                            .await
                    };
                    match tokio::time::timeout(timeout, work).await {
                        Ok(result) => result,
                        Err(_) => Err(StreamError::Timeout),
                    }
                })
            })
            .collect();

        let mut sent = usize::MAX;
        let mut failure = None;
        for joined in futures::future::join_all(handles).await {
            let result = joined.unwrap_or_else(|e| Err(StreamError::Worker(e.to_string())));
            match result {
                Ok(count) => sent = sent.min(count),
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None if n == 0 => Ok(0),
            None => Ok(sent),
        }
    }
}
