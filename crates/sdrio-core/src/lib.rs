//! sdrio-core — wire format, packet codec, sample conversion, subdevice
//! specs, and configuration. All other sdrio crates depend on this one.

pub mod codec;
pub mod config;
pub mod sample;
pub mod subdev;
pub mod wire;

pub use codec::{PacketCodec, SequenceCheck};
pub use config::SdrConfig;
pub use sample::Iq;
pub use subdev::{Direction, SubdevPair, SubdevSpec};
pub use wire::{ErrorCode, Frame, WireError};
