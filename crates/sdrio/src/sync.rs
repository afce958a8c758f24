//! Transmit DAC synchronization across radio slots and mainboards.
//!
//! Every board in the group is locked in ascending index order for the
//! whole procedure, so concurrent streamer construction over overlapping
//! boards cannot deadlock and no configuration change can interleave.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;

use crate::mainboard::{Mainboard, MainboardState};
use crate::peripherals::{DacControl, DacError};
use crate::registry::BlockId;

/// How far ahead of the latest board time the common sync tick is placed.
const SYNC_LEAD: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    Reset,
    Arm,
    Verify,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncStep::Reset => "reset",
            SyncStep::Arm => "arm",
            SyncStep::Verify => "verify",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no radio block {0}")]
    UnknownBlock(BlockId),

    #[error("board {board} runs at {rate} Hz but the group runs at {expected} Hz")]
    TickRateMismatch { board: usize, rate: f64, expected: f64 },

    #[error("{step} failed on {block}: {source}")]
    Step {
        step: SyncStep,
        block: BlockId,
        #[source]
        source: DacError,
    },
}

/// Align the DAC dividers of every block in `blocks` to one common tick.
/// Returns the tick the dividers were synchronized to.
pub fn sync_dacs(boards: &[Arc<Mainboard>], blocks: &[BlockId]) -> Result<u64, SyncError> {
    let mut targets = blocks.to_vec();
    targets.sort();
    targets.dedup();
    if targets.is_empty() {
        return Ok(0);
    }

    let mut indices: Vec<usize> = targets.iter().map(|b| b.board).collect();
    indices.dedup();

    // Ascending board order; `targets` is sorted by board first.
    let mut guards: Vec<(usize, MutexGuard<'_, MainboardState>)> = Vec::with_capacity(indices.len());
    for &index in &indices {
        let board = boards
            .get(index)
            .ok_or(SyncError::UnknownBlock(BlockId::new(index, 0)))?;
        guards.push((index, board.state.lock()));
    }

    let expected = guards[0].1.tick_rate;
    for (board, state) in &guards {
        if state.tick_rate != expected {
            return Err(SyncError::TickRateMismatch {
                board: *board,
                rate: state.tick_rate,
                expected,
            });
        }
    }

    let latest = indices
        .iter()
        .filter_map(|&i| boards.get(i))
        .map(|b| b.timekeeper.now_ticks())
        .max()
        .unwrap_or(0);
    let sync_tick = latest.saturating_add((expected * SYNC_LEAD.as_secs_f64()) as u64);

    let mut dacs: Vec<(BlockId, Arc<dyn DacControl>)> = Vec::with_capacity(targets.len());
    for block in &targets {
        let dac = guards
            .iter()
            .find(|(board, _)| *board == block.board)
            .and_then(|(_, state)| state.radios.get(block.radio))
            .map(|radio| radio.dac.clone())
            .ok_or(SyncError::UnknownBlock(*block))?;
        dacs.push((*block, dac));
    }

    for step in [SyncStep::Reset, SyncStep::Arm, SyncStep::Verify] {
        for (block, dac) in &dacs {
            let result = match step {
                SyncStep::Reset => dac.reset_sync(),
                SyncStep::Arm => dac.arm_sync(sync_tick),
                SyncStep::Verify => dac.verify_sync(sync_tick),
            };
            result.map_err(|source| {
                tracing::warn!(%block, %step, error = %source, "DAC sync step failed");
                SyncError::Step {
                    step,
                    block: *block,
                    source,
                }
            })?;
        }
    }

    tracing::info!(boards = ?indices, radios = dacs.len(), sync_tick, "DACs synchronized");
    Ok(sync_tick)
}
