//! Mainboard state: the radio slots and the configuration lock that guards
//! them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::peripherals::{DacControl, RadioPeripherals, RegisterDac};
use crate::regs::{RegisterIo, RegisterWindow};
use crate::timekeeper::Timekeeper;

/// Radio slots per mainboard (daughterboards A and B).
pub const RADIOS_PER_BOARD: usize = 2;

/// Hardware handles needed to bring up one mainboard.
pub struct MainboardParts {
    pub regs: Arc<dyn RegisterIo>,
    dacs: [Option<Arc<dyn DacControl>>; RADIOS_PER_BOARD],
}

impl MainboardParts {
    pub fn new(regs: Arc<dyn RegisterIo>) -> Self {
        Self {
            regs,
            dacs: [None, None],
        }
    }

    /// Replace the register-driven DAC of `slot` with a vendor procedure.
    /// Out-of-range slots are ignored.
    pub fn with_dac(mut self, slot: usize, dac: Arc<dyn DacControl>) -> Self {
        if let Some(entry) = self.dacs.get_mut(slot) {
            *entry = Some(dac);
        }
        self
    }
}

/// Everything mutated by configuration calls. Only touched under
/// [`Mainboard::state`].
pub struct MainboardState {
    pub tick_rate: f64,
    pub radios: Vec<RadioPeripherals>,
    pub rx_chan_dsp: Vec<usize>,
    pub tx_chan_dsp: Vec<usize>,
}

pub struct Mainboard {
    pub index: usize,
    pub state: Mutex<MainboardState>,
    pub timekeeper: Arc<Timekeeper>,
}

impl Mainboard {
    pub fn new(index: usize, parts: MainboardParts, tick_rate: f64) -> Self {
        let MainboardParts { regs, dacs } = parts;
        let radios = dacs
            .into_iter()
            .enumerate()
            .map(|(slot, dac)| {
                let dac: Arc<dyn DacControl> = match dac {
                    Some(dac) => dac,
                    None => Arc::new(RegisterDac::new(RegisterWindow::rf_core(&regs, slot))),
                };
                RadioPeripherals::new(&regs, slot, tick_rate, dac)
            })
            .collect();
        Self {
            index,
            state: Mutex::new(MainboardState {
                tick_rate,
                radios,
                rx_chan_dsp: Vec::new(),
                tx_chan_dsp: Vec::new(),
            }),
            timekeeper: Arc::new(Timekeeper::new(tick_rate)),
        }
    }
}

impl std::fmt::Debug for Mainboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mainboard").field("index", &self.index).finish()
    }
}
