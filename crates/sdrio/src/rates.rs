//! Rate & scale propagation: hardware rate changes flow to the rate cells
//! of whichever live streamers are bound to the affected blocks.
//!
//! A streamer's sample rate is always updated before its scale factor.
//! Blocks with no live streamer are skipped; a streamer dropped while an
//! update is in flight is simply not found.

use sdrio_core::Direction;

use crate::device::Device;
use crate::error::ConfigurationError;
use crate::registry::BlockId;

impl Device {
    /// Change a board's master clock. DSPs keep their requested host rates
    /// and are re-planned; live streamers follow.
    pub fn set_tick_rate(&self, board: usize, rate: f64) -> Result<(), ConfigurationError> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(ConfigurationError::InvalidRate(rate));
        }
        let mb = self.board(board)?;
        {
            let mut state = mb.state.lock();
            state.tick_rate = rate;
            for radio in state.radios.iter_mut() {
                radio.ddc.set_tick_rate(rate)?;
                radio.duc.set_tick_rate(rate)?;
            }
        }
        mb.timekeeper.set_tick_rate(rate);
        tracing::info!(board, tick_rate = rate, "tick rate changed");
        self.update_tick_rate(board, rate);
        Ok(())
    }

    /// Program one DDC and propagate the committed rate. Returns the rate
    /// actually in effect.
    pub fn set_rx_rate(&self, board: usize, radio: usize, rate: f64) -> Result<f64, ConfigurationError> {
        let actual = {
            let mut state = self.board(board)?.state.lock();
            let slot = state
                .radios
                .get_mut(radio)
                .ok_or(ConfigurationError::InvalidBoard(board))?;
            slot.ddc.set_host_rate(rate)?
        };
        tracing::debug!(board, radio, requested = rate, actual, "rx rate set");
        self.update_rx_samp_rate(board, radio, actual);
        Ok(actual)
    }

    /// Program one DUC and propagate the committed rate.
    pub fn set_tx_rate(&self, board: usize, radio: usize, rate: f64) -> Result<f64, ConfigurationError> {
        let actual = {
            let mut state = self.board(board)?.state.lock();
            let slot = state
                .radios
                .get_mut(radio)
                .ok_or(ConfigurationError::InvalidBoard(board))?;
            slot.duc.set_host_rate(rate)?
        };
        tracing::debug!(board, radio, requested = rate, actual, "tx rate set");
        self.update_tx_samp_rate(board, radio, actual);
        Ok(actual)
    }

    /// Push a new tick rate into every live streamer on `board`. Receive
    /// streamers take the DDC's committed output rate; transmit streamers
    /// take the DUC's requested host rate.
    pub fn update_tick_rate(&self, board: usize, rate: f64) {
        let Ok(mb) = self.board(board) else {
            return;
        };
        let rx = self.registry.live_on_board(Direction::Rx, board);
        let tx = self.registry.live_on_board(Direction::Tx, board);
        let state = mb.state.lock();

        for (block, core) in &rx {
            let Some(radio) = state.radios.get(block.radio) else {
                continue;
            };
            for rates in core.rates_for(*block) {
                rates.set_tick_rate(rate);
                rates.set_samp_rate(radio.ddc.output_rate());
                rates.set_scale_factor(radio.ddc.scaling_adjustment());
            }
        }
        for (block, core) in &tx {
            let Some(radio) = state.radios.get(block.radio) else {
                continue;
            };
            for rates in core.rates_for(*block) {
                rates.set_tick_rate(rate);
                // The host rate the application asked for, not `rate`: a
                // transmit streamer never runs at the master clock.
                rates.set_samp_rate(radio.duc.requested_rate());
                rates.set_scale_factor(radio.duc.scaling_adjustment());
            }
        }
        tracing::debug!(board, rx = rx.len(), tx = tx.len(), "tick rate propagated");
    }

    /// Push a new receive rate into the streamer bound to `board`/`dsp`.
    /// No live streamer there is not an error.
    pub fn update_rx_samp_rate(&self, board: usize, dsp: usize, rate: f64) {
        self.update_samp_rate(Direction::Rx, BlockId::new(board, dsp), rate);
    }

    /// Push a new transmit rate into the streamer bound to `board`/`dsp`.
    pub fn update_tx_samp_rate(&self, board: usize, dsp: usize, rate: f64) {
        self.update_samp_rate(Direction::Tx, BlockId::new(board, dsp), rate);
    }

    fn update_samp_rate(&self, direction: Direction, block: BlockId, rate: f64) {
        let Some(core) = self.registry.lookup(direction, block) else {
            tracing::trace!(%block, %direction, "no live streamer, rate not propagated");
            return;
        };
        let scale = {
            let Ok(mb) = self.board(block.board) else {
                return;
            };
            let state = mb.state.lock();
            let Some(radio) = state.radios.get(block.radio) else {
                return;
            };
            match direction {
                Direction::Rx => radio.ddc.scaling_adjustment(),
                Direction::Tx => radio.duc.scaling_adjustment(),
            }
        };
        for rates in core.rates_for(block) {
            rates.set_samp_rate(rate);
        }
        for rates in core.rates_for(block) {
            rates.set_scale_factor(scale);
        }
        tracing::debug!(%block, %direction, samp_rate = rate, scale, "sample rate propagated");
    }
}
