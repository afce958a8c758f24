//! Per-slot radio peripherals: DDC, DUC, frontend muxes and the DAC.
//!
//! Each peripheral talks to the FPGA only through its slot's register
//! window. The DSP chains also compute the host-side scale factor that
//! compensates the fixed-point gain of their CIC stages.

use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::regs::{RegisterError, RegisterIo, RegisterWindow};

// ── Register offsets (radio control window) ──────────────────────────────────

pub const REG_DDC_RATE: u32 = 0x00;
pub const REG_DDC_SCALE_IQ: u32 = 0x04;
pub const REG_DDC_MUX: u32 = 0x08;
pub const REG_DUC_RATE: u32 = 0x10;
pub const REG_DUC_SCALE_IQ: u32 = 0x14;
pub const REG_RX_FE_SWAP_IQ: u32 = 0x20;
pub const REG_TX_FE_MUX: u32 = 0x24;

// ── Register offsets (RF core window) ────────────────────────────────────────

pub const REG_DAC_SYNC_CTRL: u32 = 0x00;
pub const REG_DAC_SYNC_TIME_LO: u32 = 0x04;
pub const REG_DAC_SYNC_TIME_HI: u32 = 0x08;

const DAC_SYNC_IDLE: u32 = 0;
const DAC_SYNC_ARMED: u32 = 1;

const DDC_MUX_SWAP_IQ: u32 = 1 << 0;
const DDC_MUX_REAL_MODE: u32 = 1 << 1;

const HALFBAND_STAGES: u32 = 2;
const MAX_RATE_RATIO: f64 = 1024.0;
const RX_CIC_ORDER: i32 = 4;
const TX_CIC_ORDER: i32 = 3;
const CIC_GAIN_DIVISOR: f64 = 1.65;

/// Connection strings that denote a swapped I/Q pairing at the frontend.
pub fn is_swapped_connection(conn: &str) -> bool {
    matches!(conn, "QI" | "Q")
}

// ── DSP rate plan ─────────────────────────────────────────────────────────────

/// Rate ratio split into halfband and CIC stages, plus the fixed-point
/// scalar programmed into the chain and the residual host correction.
#[derive(Debug, Clone, Copy)]
struct DspPlan {
    ratio: u32,
    halfbands: u32,
    cic: u32,
    scalar: u32,
    correction: f64,
}

impl DspPlan {
    fn new(tick_rate: f64, host_rate: f64, cic_order: i32) -> Result<Self, ConfigurationError> {
        if !(host_rate.is_finite() && host_rate > 0.0) {
            return Err(ConfigurationError::InvalidRate(host_rate));
        }
        let ratio = (tick_rate / host_rate).round().clamp(1.0, MAX_RATE_RATIO) as u32;

        let mut cic = ratio;
        let mut halfbands = 0;
        while halfbands < HALFBAND_STAGES && cic % 2 == 0 {
            cic /= 2;
            halfbands += 1;
        }

        let gain = (cic as f64).powi(cic_order);
        let adjustment = 2f64.powf(gain.log2().ceil()) / (CIC_GAIN_DIVISOR * gain);
        let factor = 1.0 + adjustment.log2().ceil().max(0.0);
        let target = (1u32 << 17) as f64 * adjustment / factor;
        let scalar = target.round().max(1.0);

        Ok(Self {
            ratio,
            halfbands,
            cic,
            scalar: scalar as u32,
            correction: target / scalar * factor,
        })
    }

    fn rate_word(&self) -> u32 {
        (self.halfbands << 16) | self.cic
    }
}

// ── DDC ───────────────────────────────────────────────────────────────────────

/// Digital down-converter: decimates from the tick rate to the host rate.
#[derive(Debug)]
pub struct Ddc {
    window: RegisterWindow,
    tick_rate: f64,
    requested_rate: f64,
    decim: u32,
    correction: f64,
}

impl Ddc {
    pub fn new(window: RegisterWindow, tick_rate: f64) -> Self {
        Self {
            window,
            tick_rate,
            requested_rate: tick_rate,
            decim: 1,
            correction: 1.0,
        }
    }

    /// Program the decimation closest to `rate`. Returns the rate the
    /// chain actually produces.
    pub fn set_host_rate(&mut self, rate: f64) -> Result<f64, ConfigurationError> {
        let plan = DspPlan::new(self.tick_rate, rate, RX_CIC_ORDER)?;
        self.window.poke32(REG_DDC_RATE, plan.rate_word())?;
        self.window.poke32(REG_DDC_SCALE_IQ, plan.scalar)?;
        self.requested_rate = rate;
        self.decim = plan.ratio;
        self.correction = plan.correction;
        Ok(self.output_rate())
    }

    /// Re-plan the current request against a new tick rate.
    pub fn set_tick_rate(&mut self, tick_rate: f64) -> Result<f64, ConfigurationError> {
        self.tick_rate = tick_rate;
        self.set_host_rate(self.requested_rate)
    }

    /// Committed output rate.
    pub fn output_rate(&self) -> f64 {
        self.tick_rate / self.decim as f64
    }

    pub fn requested_rate(&self) -> f64 {
        self.requested_rate
    }

    pub fn decimation(&self) -> u32 {
        self.decim
    }

    /// Host scale factor for sc16 → float conversion.
    pub fn scaling_adjustment(&self) -> f64 {
        self.correction / 32767.0
    }

    pub fn set_mux(&mut self, conn: &str, fe_swapped: bool) -> Result<(), ConfigurationError> {
        let mode = match conn {
            "IQ" => 0,
            "QI" => DDC_MUX_SWAP_IQ,
            "I" => DDC_MUX_REAL_MODE,
            "Q" => DDC_MUX_SWAP_IQ | DDC_MUX_REAL_MODE,
            other => return Err(ConfigurationError::UnknownConnection(other.to_string())),
        };
        // A swap already done by the frontend must not be done twice.
        let value = mode ^ if fe_swapped { DDC_MUX_SWAP_IQ } else { 0 };
        self.window.poke32(REG_DDC_MUX, value)?;
        Ok(())
    }
}

// ── DUC ───────────────────────────────────────────────────────────────────────

/// Digital up-converter: interpolates from the host rate to the tick rate.
#[derive(Debug)]
pub struct Duc {
    window: RegisterWindow,
    tick_rate: f64,
    requested_rate: f64,
    interp: u32,
    correction: f64,
}

impl Duc {
    pub fn new(window: RegisterWindow, tick_rate: f64) -> Self {
        Self {
            window,
            tick_rate,
            requested_rate: tick_rate,
            interp: 1,
            correction: 1.0,
        }
    }

    pub fn set_host_rate(&mut self, rate: f64) -> Result<f64, ConfigurationError> {
        let plan = DspPlan::new(self.tick_rate, rate, TX_CIC_ORDER)?;
        self.window.poke32(REG_DUC_RATE, plan.rate_word())?;
        self.window.poke32(REG_DUC_SCALE_IQ, plan.scalar)?;
        self.requested_rate = rate;
        self.interp = plan.ratio;
        self.correction = plan.correction;
        Ok(self.input_rate())
    }

    pub fn set_tick_rate(&mut self, tick_rate: f64) -> Result<f64, ConfigurationError> {
        self.tick_rate = tick_rate;
        self.set_host_rate(self.requested_rate)
    }

    /// Committed input rate.
    pub fn input_rate(&self) -> f64 {
        self.tick_rate / self.interp as f64
    }

    pub fn requested_rate(&self) -> f64 {
        self.requested_rate
    }

    pub fn interpolation(&self) -> u32 {
        self.interp
    }

    /// Host scale factor for float → sc16 conversion.
    pub fn scaling_adjustment(&self) -> f64 {
        self.correction * 32767.0
    }
}

// ── Frontends ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct RxFrontend {
    window: RegisterWindow,
    swapped: bool,
}

impl RxFrontend {
    pub fn new(window: RegisterWindow) -> Self {
        Self {
            window,
            swapped: false,
        }
    }

    pub fn set_mux(&mut self, swapped: bool) -> Result<(), RegisterError> {
        self.window.poke32(REG_RX_FE_SWAP_IQ, swapped as u32)?;
        self.swapped = swapped;
        Ok(())
    }

    pub fn is_swapped(&self) -> bool {
        self.swapped
    }
}

#[derive(Debug)]
pub struct TxFrontend {
    window: RegisterWindow,
    connection: Option<String>,
}

impl TxFrontend {
    pub fn new(window: RegisterWindow) -> Self {
        Self {
            window,
            connection: None,
        }
    }

    /// Route I and Q to the DAC inputs named by the connection string.
    pub fn set_mux(&mut self, conn: &str) -> Result<(), ConfigurationError> {
        let value = match conn {
            "IQ" => 0x01,
            "QI" => 0x10,
            "I" => 0x0f,
            "Q" => 0xf0,
            other => return Err(ConfigurationError::UnknownConnection(other.to_string())),
        };
        self.window.poke32(REG_TX_FE_MUX, value)?;
        self.connection = Some(conn.to_string());
        Ok(())
    }

    pub fn connection(&self) -> Option<&str> {
        self.connection.as_deref()
    }
}

// ── DAC ───────────────────────────────────────────────────────────────────────

/// Board-vendor DAC clock-divider alignment. The synchronization
/// controller calls these in order: reset every DAC, arm every DAC at a
/// common tick, verify every DAC.
pub trait DacControl: Send + Sync {
    fn reset_sync(&self) -> Result<(), DacError>;
    fn arm_sync(&self, sync_tick: u64) -> Result<(), DacError>;
    fn verify_sync(&self, sync_tick: u64) -> Result<(), DacError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DacError {
    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("readback mismatch: expected 0x{expected:x}, found 0x{found:x}")]
    Readback { expected: u64, found: u64 },

    #[error("{0}")]
    Vendor(String),
}

/// DAC sync through the RF core window: a timed divider reset latched at
/// `sync_tick`, verified by reading the latch back.
pub struct RegisterDac {
    window: RegisterWindow,
}

impl RegisterDac {
    pub fn new(window: RegisterWindow) -> Self {
        Self { window }
    }
}

impl DacControl for RegisterDac {
    fn reset_sync(&self) -> Result<(), DacError> {
        self.window.poke32(REG_DAC_SYNC_CTRL, DAC_SYNC_IDLE)?;
        Ok(())
    }

    fn arm_sync(&self, sync_tick: u64) -> Result<(), DacError> {
        self.window.poke32(REG_DAC_SYNC_TIME_LO, sync_tick as u32)?;
        self.window.poke32(REG_DAC_SYNC_TIME_HI, (sync_tick >> 32) as u32)?;
        self.window.poke32(REG_DAC_SYNC_CTRL, DAC_SYNC_ARMED)?;
        Ok(())
    }

    fn verify_sync(&self, sync_tick: u64) -> Result<(), DacError> {
        let ctrl = self.window.peek32(REG_DAC_SYNC_CTRL)?;
        if ctrl != DAC_SYNC_ARMED {
            return Err(DacError::Readback {
                expected: DAC_SYNC_ARMED as u64,
                found: ctrl as u64,
            });
        }
        let lo = self.window.peek32(REG_DAC_SYNC_TIME_LO)? as u64;
        let hi = self.window.peek32(REG_DAC_SYNC_TIME_HI)? as u64;
        let latched = (hi << 32) | lo;
        if latched != sync_tick {
            return Err(DacError::Readback {
                expected: sync_tick,
                found: latched,
            });
        }
        Ok(())
    }
}

// ── Slot bundle ───────────────────────────────────────────────────────────────

/// Everything one radio slot owns. Lives inside the mainboard state and is
/// only touched under the mainboard configuration lock.
pub struct RadioPeripherals {
    pub ddc: Ddc,
    pub duc: Duc,
    pub rx_fe: RxFrontend,
    pub tx_fe: TxFrontend,
    pub dac: Arc<dyn DacControl>,
}

impl RadioPeripherals {
    pub fn new(
        io: &Arc<dyn RegisterIo>,
        slot: usize,
        tick_rate: f64,
        dac: Arc<dyn DacControl>,
    ) -> Self {
        let ctrl = RegisterWindow::radio_ctrl(io, slot);
        Self {
            ddc: Ddc::new(ctrl.clone(), tick_rate),
            duc: Duc::new(ctrl.clone(), tick_rate),
            rx_fe: RxFrontend::new(ctrl.clone()),
            tx_fe: TxFrontend::new(ctrl),
            dac,
        }
    }
}
