//! sdrio — host-side streaming engine.
//!
//! Moves sample data between application buffers and radio blocks over
//! frame transports, keeps multi-channel streams time-aligned, follows
//! runtime rate changes and phase-aligns transmit DACs.
//!
//! Runtime modules are not loaded implicitly; call
//! [`modules::init_modules`] once at startup if the deployment uses them.

pub mod device;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod mainboard;
pub mod mapper;
pub mod modules;
pub mod peripherals;
pub mod rates;
pub mod registry;
pub mod regs;
pub mod streamer;
pub mod sync;
pub mod timekeeper;
pub mod transport;
pub mod tree;

pub use device::{Device, StreamArgs};
pub use error::{ConfigurationError, ErrorClass, StreamError};
pub use events::{AsyncEvent, AsyncEventKind, AsyncEventQueue};
pub use mainboard::MainboardParts;
pub use registry::BlockId;
pub use streamer::{RxMetadata, RxStreamer, TxMetadata, TxStreamer};
pub use transport::{LoopbackFactory, Transport, TransportFactory};

pub use sdrio_core::{Direction, Iq, SdrConfig, SubdevSpec};
