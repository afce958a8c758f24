//! Register access — the only path from the host into the FPGA.
//!
//! Every functional block owns a fixed address window. Blocks address
//! registers by offset within their window; an access that would leave the
//! window is refused before it reaches the bus.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};

/// Byte-addressed 32-bit register bus. Implemented by the board transport.
pub trait RegisterIo: Send + Sync {
    fn poke32(&self, addr: u32, value: u32) -> Result<(), RegisterError>;
    fn peek32(&self, addr: u32) -> Result<u32, RegisterError>;
}

// ── Address layout ────────────────────────────────────────────────────────────

/// Radio control block: DSP chains and frontend muxes, one window per slot.
pub const RADIO_CTRL_BASE: u32 = 0x0010_0000;

/// RF core block: DAC control, one window per slot.
pub const RF_CORE_BASE: u32 = 0x0020_0000;

/// Size of every per-slot window.
pub const SLOT_WINDOW_SIZE: u32 = 0x1000;

/// Bounded view of the register bus for one functional block.
#[derive(Clone)]
pub struct RegisterWindow {
    io: Arc<dyn RegisterIo>,
    base: u32,
    size: u32,
}

impl RegisterWindow {
    pub fn new(io: Arc<dyn RegisterIo>, base: u32, size: u32) -> Self {
        Self { io, base, size }
    }

    /// Radio control window for a slot.
    pub fn radio_ctrl(io: &Arc<dyn RegisterIo>, slot: usize) -> Self {
        Self::new(io.clone(), RADIO_CTRL_BASE + slot as u32 * SLOT_WINDOW_SIZE, SLOT_WINDOW_SIZE)
    }

    /// RF core window for a slot.
    pub fn rf_core(io: &Arc<dyn RegisterIo>, slot: usize) -> Self {
        Self::new(io.clone(), RF_CORE_BASE + slot as u32 * SLOT_WINDOW_SIZE, SLOT_WINDOW_SIZE)
    }

    pub fn poke32(&self, offset: u32, value: u32) -> Result<(), RegisterError> {
        let addr = self.addr(offset)?;
        self.io.poke32(addr, value)
    }

    pub fn peek32(&self, offset: u32) -> Result<u32, RegisterError> {
        let addr = self.addr(offset)?;
        self.io.peek32(addr)
    }

    fn addr(&self, offset: u32) -> Result<u32, RegisterError> {
        let fits = offset % 4 == 0 && offset.checked_add(4).is_some_and(|end| end <= self.size);
        if !fits {
            return Err(RegisterError::OutOfWindow {
                offset,
                size: self.size,
            });
        }
        Ok(self.base + offset)
    }
}

impl std::fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("base", &format_args!("0x{:08x}", self.base))
            .field("size", &format_args!("0x{:x}", self.size))
            .finish()
    }
}

// ── In-memory bus ─────────────────────────────────────────────────────────────

/// Register bus backed by a map. Reads return the last value written (0
/// if never written). Used for simulated boards and tests.
#[derive(Default)]
pub struct MemoryRegisters {
    values: DashMap<u32, u32>,
    faults: DashSet<u32>,
    writes: AtomicUsize,
}

impl MemoryRegisters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Make every later write to `addr` fail with a bus error.
    pub fn fail_writes_to(&self, addr: u32) {
        self.faults.insert(addr);
    }

    /// Total successful writes since creation.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }

    /// Last value written to `addr`, if any.
    pub fn value(&self, addr: u32) -> Option<u32> {
        self.values.get(&addr).map(|v| *v)
    }
}

impl RegisterIo for MemoryRegisters {
    fn poke32(&self, addr: u32, value: u32) -> Result<(), RegisterError> {
        if self.faults.contains(&addr) {
            return Err(RegisterError::Bus(format!("injected write fault at 0x{addr:08x}")));
        }
        self.values.insert(addr, value);
        self.writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(addr, value, "poke32");
        Ok(())
    }

    fn peek32(&self, addr: u32) -> Result<u32, RegisterError> {
        Ok(self.value(addr).unwrap_or(0))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegisterError {
    #[error("offset 0x{offset:x} is outside the 0x{size:x}-byte window")]
    OutOfWindow { offset: u32, size: u32 },

    #[error("register bus error: {0}")]
    Bus(String),
}
