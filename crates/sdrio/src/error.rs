use sdrio_core::subdev::{Direction, SubdevParseError};
use sdrio_core::WireError;

use crate::regs::RegisterError;
use crate::sync::SyncError;
use crate::transport::TransportError;

/// Coarse failure category, for callers that only need to know which layer
/// gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Protocol,
    Transport,
    Configuration,
    Synchronization,
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no mainboard {0}")]
    InvalidBoard(usize),

    #[error("subdev spec is empty")]
    EmptySpec,

    #[error("subdev spec has {0} entries, at most 2 are supported")]
    TooManyEntries(usize),

    #[error("invalid daughterboard name {0:?}, expected A or B")]
    InvalidDaughterboard(String),

    #[error("invalid subdev spec {0}:{1}, two entries must name daughterboards A and B")]
    NotComplementaryPair(String, String),

    #[error("mainboard {board} has no {direction} frontend {db}:{sd}")]
    UnknownFrontend {
        board: usize,
        direction: Direction,
        db: String,
        sd: String,
    },

    #[error("unknown frontend connection {0:?}")]
    UnknownConnection(String),

    #[error("{direction} channel {channel} out of range, device has {available}")]
    InvalidChannel {
        channel: usize,
        available: usize,
        direction: Direction,
    },

    #[error("channel {0} requested twice")]
    DuplicateChannel(usize),

    #[error("no channels requested")]
    NoChannels,

    #[error("invalid sample rate {0}")]
    InvalidRate(f64),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error(transparent)]
    Parse(#[from] SubdevParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("timed out")]
    Timeout,

    #[error("transport for channel {channel} closed")]
    TransportClosed { channel: usize },

    #[error("streamer closed")]
    Closed,

    #[error("channels failed to align after {attempts} attempts")]
    Misaligned { attempts: usize },

    #[error("expected {expected} buffers, got {got}")]
    BufferCount { expected: usize, got: usize },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("failed to sync DACs: {0}")]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("channel worker failed: {0}")]
    Worker(String),
}

impl StreamError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StreamError::Timeout => ErrorClass::Timeout,
            StreamError::Wire(_) | StreamError::Misaligned { .. } => ErrorClass::Protocol,
            StreamError::TransportClosed { .. }
            | StreamError::Closed
            | StreamError::Transport(_)
            | StreamError::Worker(_) => ErrorClass::Transport,
            StreamError::Configuration(_) | StreamError::BufferCount { .. } => {
                ErrorClass::Configuration
            }
            StreamError::Sync(_) => ErrorClass::Synchronization,
        }
    }
}

pub type Result<T, E = StreamError> = std::result::Result<T, E>;
