//! sdrio integration test harness.
//!
//! Every test runs against a simulated device: in-memory register buses
//! behind each mainboard and loopback transports whose device-side ends
//! the test drives directly. No hardware or network setup is needed:
//!
//!   cargo test --test integration
//!
//! Set RUST_LOG=sdrio=debug to see the engine's logs.

mod config;
mod rates;
mod streaming;
mod sync;

use std::sync::{Arc, Once};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sdrio::regs::MemoryRegisters;
use sdrio::transport::{LoopbackTransport, Recv};
use sdrio::{BlockId, Device, Direction, LoopbackFactory, MainboardParts, SdrConfig, Transport};
use sdrio_core::{Frame, PacketCodec};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A device over simulated boards.
pub struct Sim {
    pub device: Device,
    pub links: Arc<LoopbackFactory>,
    pub regs: Vec<Arc<MemoryRegisters>>,
}

impl Sim {
    pub fn new(boards: usize) -> Self {
        Self::with_config(boards, SdrConfig::default())
    }

    pub fn with_config(boards: usize, config: SdrConfig) -> Self {
        Self::build(boards, config, |_, parts| parts)
    }

    /// `customize` may swap in vendor DAC procedures per board.
    pub fn build(
        boards: usize,
        config: SdrConfig,
        customize: impl Fn(usize, MainboardParts) -> MainboardParts,
    ) -> Self {
        init_tracing();
        let links = LoopbackFactory::new(config.streaming.loopback_depth);
        let regs: Vec<_> = (0..boards).map(|_| MemoryRegisters::shared()).collect();
        let parts = regs
            .iter()
            .enumerate()
            .map(|(board, mem)| customize(board, MainboardParts::new(mem.clone())))
            .collect();
        let device = Device::new(config, parts, links.clone()).expect("device should come up");
        Self {
            device,
            links,
            regs,
        }
    }

    /// Device side of the link most recently opened for `block`.
    pub fn device_end(&self, board: usize, radio: usize, direction: Direction) -> DeviceEnd {
        let block = BlockId::new(board, radio);
        let link = self
            .links
            .take_device_end(block, direction)
            .unwrap_or_else(|| panic!("no {direction} link open for {block}"));
        DeviceEnd {
            link,
            codec: PacketCodec::new(block.stream_id(direction)),
        }
    }
}

/// The radio's end of one stream.
pub struct DeviceEnd {
    pub link: LoopbackTransport,
    pub codec: PacketCodec,
}

impl DeviceEnd {
    /// Send one correctly sequenced frame towards the host.
    pub async fn emit(&mut self, payload: Vec<u32>, timestamp: Option<u64>) -> Result<()> {
        let frame = self.codec.next_frame(payload, timestamp, false)?;
        self.emit_frame(frame).await
    }

    pub async fn emit_frame(&mut self, frame: Frame) -> Result<()> {
        if !self.link.send(frame.encode()?).await {
            bail!("host end of stream {} is gone", self.codec.stream_id());
        }
        Ok(())
    }

    /// Next frame the host sent.
    pub async fn next_frame(&mut self) -> Result<Frame> {
        match self.link.recv(WAIT).await {
            Recv::Frame(bytes) => Frame::decode(&bytes).context("host sent an undecodable frame"),
            Recv::Timeout => bail!("no frame within {WAIT:?}"),
            Recv::Closed => bail!("host end closed"),
        }
    }

    /// True if the host sends nothing for `window`.
    pub async fn is_silent(&mut self, window: Duration) -> bool {
        matches!(self.link.recv(window).await, Recv::Timeout)
    }
}
