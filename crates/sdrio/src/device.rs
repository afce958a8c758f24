//! The device: mainboards, property tree, streamer registry and event
//! queue behind one application-facing handle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use sdrio_core::config::SdrConfig;
use sdrio_core::wire::MAX_SAMPLES_PER_FRAME;
use sdrio_core::{Direction, SubdevSpec};
use tokio::sync::watch;

use crate::endpoint::{ChannelEndpoint, EndpointContext, StreamRates};
use crate::error::{ConfigurationError, Result};
use crate::events::{AsyncEvent, AsyncEventQueue};
use crate::mainboard::{Mainboard, MainboardParts};
use crate::mapper;
use crate::registry::{BlockId, StreamerRegistry};
use crate::streamer::{RxStreamer, StreamerCore, TxStreamer};
use crate::sync::sync_dacs;
use crate::timekeeper::Timekeeper;
use crate::transport::TransportFactory;
use crate::tree::PropertyTree;

/// Subdev spec applied to every board at startup.
pub const DEFAULT_SUBDEV_SPEC: &str = "A:0 B:0";

/// Frontend connections a daughterboard can declare.
const CONNECTIONS: [&str; 4] = ["IQ", "QI", "I", "Q"];

/// What a new streamer should carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamArgs {
    /// Global channel numbers, in the order buffers are passed.
    pub channels: Vec<usize>,
    /// Overrides the configured frame size.
    pub samples_per_frame: Option<usize>,
}

impl StreamArgs {
    pub fn new(channels: impl Into<Vec<usize>>) -> Self {
        Self {
            channels: channels.into(),
            samples_per_frame: None,
        }
    }

    pub fn with_samples_per_frame(mut self, spf: usize) -> Self {
        self.samples_per_frame = Some(spf);
        self
    }
}

pub struct Device {
    pub(crate) config: SdrConfig,
    pub(crate) boards: Vec<Arc<Mainboard>>,
    pub(crate) tree: PropertyTree,
    pub(crate) registry: StreamerRegistry,
    pub(crate) events: AsyncEventQueue,
    transports: Arc<dyn TransportFactory>,
}

impl Device {
    /// Bring up every board: default frontends, default rates and the
    /// default subdev spec in both directions.
    pub fn new(
        config: SdrConfig,
        boards: Vec<MainboardParts>,
        transports: Arc<dyn TransportFactory>,
    ) -> Result<Self, ConfigurationError> {
        let tick_rate = config.clock.tick_rate;
        let samp_rate = config.clock.default_samp_rate;
        if !(tick_rate.is_finite() && tick_rate > 0.0) {
            return Err(ConfigurationError::InvalidRate(tick_rate));
        }

        let device = Self {
            boards: boards
                .into_iter()
                .enumerate()
                .map(|(index, parts)| Arc::new(Mainboard::new(index, parts, tick_rate)))
                .collect(),
            tree: PropertyTree::new(),
            registry: StreamerRegistry::new(),
            events: AsyncEventQueue::new(config.events.capacity),
            transports,
            config,
        };

        let spec: SubdevSpec = DEFAULT_SUBDEV_SPEC.parse()?;
        for board in &device.boards {
            for direction in [Direction::Rx, Direction::Tx] {
                for db in ["A", "B"] {
                    device.tree.set_connection(board.index, direction, db, "0", "IQ");
                }
            }
            {
                let mut state = board.state.lock();
                for radio in state.radios.iter_mut() {
                    radio.ddc.set_host_rate(samp_rate)?;
                    radio.duc.set_host_rate(samp_rate)?;
                }
            }
            device.set_subdev_spec(board.index, Direction::Rx, &spec)?;
            device.set_subdev_spec(board.index, Direction::Tx, &spec)?;
        }

        tracing::info!(boards = device.boards.len(), tick_rate, samp_rate, "device initialized");
        Ok(device)
    }

    pub fn config(&self) -> &SdrConfig {
        &self.config
    }

    pub fn tree(&self) -> &PropertyTree {
        &self.tree
    }

    pub fn events(&self) -> &AsyncEventQueue {
        &self.events
    }

    pub fn num_boards(&self) -> usize {
        self.boards.len()
    }

    pub(crate) fn board(&self, index: usize) -> Result<&Arc<Mainboard>, ConfigurationError> {
        self.boards
            .get(index)
            .ok_or(ConfigurationError::InvalidBoard(index))
    }

    pub fn timekeeper(&self, board: usize) -> Result<Arc<Timekeeper>, ConfigurationError> {
        Ok(self.board(board)?.timekeeper.clone())
    }

    /// Wait up to `timeout` for the next device event.
    pub async fn recv_async_event(&self, timeout: Duration) -> Option<AsyncEvent> {
        self.events.pop(timeout).await
    }

    /// Live streamers currently registered, counted per radio block.
    pub fn live_streamers(&self, direction: Direction) -> usize {
        self.registry.live_count(direction)
    }

    // ── Configuration ─────────────────────────────────────────────────────

    /// Map the board's channels onto its DSPs. Returns the channel → DSP
    /// mapping now in effect.
    pub fn set_subdev_spec(
        &self,
        board: usize,
        direction: Direction,
        spec: &SubdevSpec,
    ) -> Result<Vec<usize>, ConfigurationError> {
        let mb = self.board(board)?;
        let mut state = mb.state.lock();
        let mapping = mapper::configure(&self.tree, board, direction, spec, &mut state.radios)?;
        match direction {
            Direction::Rx => state.rx_chan_dsp = mapping.clone(),
            Direction::Tx => state.tx_chan_dsp = mapping.clone(),
        }
        Ok(mapping)
    }

    pub fn subdev_mapping(&self, board: usize, direction: Direction) -> Result<Vec<usize>, ConfigurationError> {
        let state = self.board(board)?.state.lock();
        Ok(match direction {
            Direction::Rx => state.rx_chan_dsp.clone(),
            Direction::Tx => state.tx_chan_dsp.clone(),
        })
    }

    /// Declare or change a frontend's connection. Takes effect on the next
    /// [`Device::set_subdev_spec`] for that board and direction.
    pub fn set_frontend_connection(
        &self,
        board: usize,
        direction: Direction,
        db: &str,
        sd: &str,
        conn: &str,
    ) -> Result<(), ConfigurationError> {
        self.board(board)?;
        if !CONNECTIONS.contains(&conn) {
            return Err(ConfigurationError::UnknownConnection(conn.to_string()));
        }
        self.tree.set_connection(board, direction, db, sd, conn);
        Ok(())
    }

    /// Committed receive rate of one DSP.
    pub fn rx_rate(&self, board: usize, radio: usize) -> Result<f64, ConfigurationError> {
        let state = self.board(board)?.state.lock();
        state
            .radios
            .get(radio)
            .map(|r| r.ddc.output_rate())
            .ok_or(ConfigurationError::InvalidBoard(board))
    }

    /// Committed transmit rate of one DSP.
    pub fn tx_rate(&self, board: usize, radio: usize) -> Result<f64, ConfigurationError> {
        let state = self.board(board)?.state.lock();
        state
            .radios
            .get(radio)
            .map(|r| r.duc.input_rate())
            .ok_or(ConfigurationError::InvalidBoard(board))
    }

    pub fn num_channels(&self, direction: Direction) -> usize {
        self.boards
            .iter()
            .map(|b| {
                let state = b.state.lock();
                match direction {
                    Direction::Rx => state.rx_chan_dsp.len(),
                    Direction::Tx => state.tx_chan_dsp.len(),
                }
            })
            .sum()
    }

    /// Resolve global channel numbers to radio blocks. Channels are
    /// numbered across boards in board order, each board contributing its
    /// channel → DSP mapping.
    fn resolve_channels(
        &self,
        direction: Direction,
        channels: &[usize],
    ) -> Result<Vec<(usize, BlockId)>, ConfigurationError> {
        if channels.is_empty() {
            return Err(ConfigurationError::NoChannels);
        }
        let mut table = Vec::new();
        for board in &self.boards {
            let state = board.state.lock();
            let mapping = match direction {
                Direction::Rx => &state.rx_chan_dsp,
                Direction::Tx => &state.tx_chan_dsp,
            };
            table.extend(mapping.iter().map(|&dsp| BlockId::new(board.index, dsp)));
        }

        let mut seen = HashSet::new();
        channels
            .iter()
            .map(|&channel| {
                if !seen.insert(channel) {
                    return Err(ConfigurationError::DuplicateChannel(channel));
                }
                table
                    .get(channel)
                    .map(|block| (channel, *block))
                    .ok_or(ConfigurationError::InvalidChannel {
                        channel,
                        available: table.len(),
                        direction,
                    })
            })
            .collect()
    }

    /// Current rate cell contents for a block.
    fn initial_rates(&self, direction: Direction, block: BlockId) -> Result<StreamRates, ConfigurationError> {
        let state = self.board(block.board)?.state.lock();
        let radio = state
            .radios
            .get(block.radio)
            .ok_or(ConfigurationError::InvalidBoard(block.board))?;
        Ok(match direction {
            Direction::Rx => StreamRates::new(
                state.tick_rate,
                radio.ddc.output_rate(),
                radio.ddc.scaling_adjustment(),
            ),
            Direction::Tx => StreamRates::new(
                state.tick_rate,
                radio.duc.input_rate(),
                radio.duc.scaling_adjustment(),
            ),
        })
    }

    fn build_core(&self, direction: Direction, args: &StreamArgs) -> Result<Arc<StreamerCore>> {
        let bound = self.resolve_channels(direction, &args.channels)?;
        let samples_per_frame = args
            .samples_per_frame
            .unwrap_or_else(|| self.config.effective_samples_per_frame())
            .clamp(1, MAX_SAMPLES_PER_FRAME);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let mut endpoints = Vec::with_capacity(bound.len());
        for (channel, block) in bound {
            let rates = Arc::new(self.initial_rates(direction, block)?);
            let transport = self.transports.make_transport(block, direction)?;
            let ctx = EndpointContext {
                events: self.events.clone(),
                timekeeper: self.board(block.board)?.timekeeper.clone(),
                shutdown: shutdown_rx.clone(),
                samples_per_frame,
            };
            endpoints.push(ChannelEndpoint::new(channel, block, direction, transport, rates, ctx));
        }

        let default_timeout = match direction {
            Direction::Rx => self.config.streaming.recv_timeout(),
            Direction::Tx => self.config.streaming.send_timeout(),
        };
        Ok(StreamerCore::new(
            direction,
            endpoints,
            shutdown,
            self.config.streaming.align_attempts,
            default_timeout,
        ))
    }

    /// Distinct live transmit streamers, in board order.
    fn live_tx_groups(&self) -> Vec<Arc<StreamerCore>> {
        let mut groups: Vec<Arc<StreamerCore>> = Vec::new();
        for board in 0..self.boards.len() {
            for (_, core) in self.registry.live_on_board(Direction::Tx, board) {
                if !groups.iter().any(|seen| Arc::ptr_eq(seen, &core)) {
                    groups.push(core);
                }
            }
        }
        groups
    }

    // ── Streamers ─────────────────────────────────────────────────────────

    pub fn create_rx_streamer(&self, args: &StreamArgs) -> Result<RxStreamer> {
        let core = self.build_core(Direction::Rx, args)?;
        for block in core.blocks() {
            self.registry.register(Direction::Rx, block, &core);
        }
        tracing::info!(channels = ?args.channels, "rx streamer created");
        Ok(RxStreamer::from_core(core))
    }

    /// Build a transmit streamer and phase-align the DACs it drives, then
    /// re-align the DACs of every other live transmit streamer, one group
    /// per streamer. If any group fails to sync the new streamer is
    /// discarded unregistered.
    pub fn create_tx_streamer(&self, args: &StreamArgs) -> Result<TxStreamer> {
        let core = self.build_core(Direction::Tx, args)?;
        sync_dacs(&self.boards, &core.blocks())?;
        let others = self.live_tx_groups();
        for group in &others {
            sync_dacs(&self.boards, &group.blocks())?;
        }
        tracing::debug!(resynced = others.len(), "live tx streamers re-synced");
        for block in core.blocks() {
            self.registry.register(Direction::Tx, block, &core);
        }
        tracing::info!(channels = ?args.channels, "tx streamer created");
        Ok(TxStreamer::from_core(core))
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("boards", &self.boards.len())
            .field("registry", &self.registry)
            .field("events", &self.events)
            .finish()
    }
}
