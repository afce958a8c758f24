//! Non-owning lookup of live streamers by radio block.
//!
//! Entries hold `Weak` references. The streamer's lifetime belongs to its
//! caller; a lookup that finds an expired entry behaves as if nothing was
//! registered.

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use sdrio_core::Direction;

use crate::streamer::StreamerCore;

/// One radio slot on one mainboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId {
    pub board: usize,
    pub radio: usize,
}

impl BlockId {
    pub const fn new(board: usize, radio: usize) -> Self {
        Self { board, radio }
    }

    /// Wire stream id for this block in one direction.
    pub fn stream_id(&self, direction: Direction) -> u32 {
        let dir = match direction {
            Direction::Rx => 0,
            Direction::Tx => 1,
        };
        ((self.board as u32 & 0xffff) << 16) | ((self.radio as u32 & 0xff) << 8) | dir
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/Radio_{}", self.board, self.radio)
    }
}

#[derive(Default)]
pub struct StreamerRegistry {
    rx: DashMap<BlockId, Weak<StreamerCore>>,
    tx: DashMap<BlockId, Weak<StreamerCore>>,
}

impl StreamerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, direction: Direction) -> &DashMap<BlockId, Weak<StreamerCore>> {
        match direction {
            Direction::Rx => &self.rx,
            Direction::Tx => &self.tx,
        }
    }

    /// Record `streamer` as the current streamer of `block`. A newer
    /// streamer on the same block replaces the older entry.
    pub fn register(&self, direction: Direction, block: BlockId, streamer: &Arc<StreamerCore>) {
        self.table(direction).insert(block, Arc::downgrade(streamer));
        tracing::debug!(%block, %direction, "streamer registered");
    }

    /// Live streamer bound to `block`, if any.
    pub fn lookup(&self, direction: Direction, block: BlockId) -> Option<Arc<StreamerCore>> {
        let table = self.table(direction);
        let found = table.get(&block).and_then(|weak| weak.upgrade());
        if found.is_none() {
            table.remove_if(&block, |_, weak| weak.strong_count() == 0);
        }
        found
    }

    /// Live streamers bound to any block of `board`, one per block.
    pub fn live_on_board(
        &self,
        direction: Direction,
        board: usize,
    ) -> Vec<(BlockId, Arc<StreamerCore>)> {
        let mut live: Vec<_> = self
            .table(direction)
            .iter()
            .filter(|entry| entry.key().board == board)
            .filter_map(|entry| entry.value().upgrade().map(|s| (*entry.key(), s)))
            .collect();
        live.sort_by_key(|(block, _)| *block);
        live
    }

    pub fn live_count(&self, direction: Direction) -> usize {
        self.table(direction)
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }
}

impl fmt::Debug for StreamerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamerRegistry")
            .field("rx", &self.live_count(Direction::Rx))
            .field("tx", &self.live_count(Direction::Tx))
            .finish()
    }
}
