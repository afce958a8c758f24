//! Complex samples and the sc16 wire conversion.
//!
//! The scale factor maps between application units and wire integers. On
//! transmit `word = round(x * scale)`; on receive `x = word * scale`. The
//! rate manager keeps the factor in step with the DSP gain.

/// One complex sample in application units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Iq {
    pub i: f32,
    pub q: f32,
}

impl Iq {
    pub const fn new(i: f32, q: f32) -> Self {
        Self { i, q }
    }
}

/// Quantize one sample to an sc16 word, saturating at the i16 range.
pub fn to_sc16(sample: Iq, scale: f64) -> u32 {
    let i = quantize(sample.i as f64 * scale) as u16 as u32;
    let q = quantize(sample.q as f64 * scale) as u16 as u32;
    (i << 16) | q
}

/// Expand an sc16 word to application units.
pub fn from_sc16(word: u32, scale: f64) -> Iq {
    let i = (word >> 16) as u16 as i16;
    let q = word as u16 as i16;
    Iq {
        i: (i as f64 * scale) as f32,
        q: (q as f64 * scale) as f32,
    }
}

fn quantize(x: f64) -> i16 {
    x.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}
