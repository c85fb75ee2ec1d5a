//! Single-cycle waveform tables.
//!
//! Five presets are built once and handed out as shared read-only handles;
//! custom waveforms hold at least two frames and can be rewritten in place.

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::attr::{AttrKind, AttrValue, Attributes};
use crate::dsp::sin01;
use crate::error::{Error, Result};
use crate::sequence::Sequence;
use crate::shared::Shared;

/// Minimum frames in a waveform cycle.
pub const MIN_WAVEFORM_LEN: usize = 2;

/// Phases of the square preset; the duty cycle counts high phases out of these.
pub const SQUARE_PHASES: usize = 16;

const PRESET_AMPLITUDE: i16 = i16::MAX;
const NOISE_SEED: u64 = 0x6368_6970;

/// Waveform selector. Values are the wire encoding of the `Waveform` and
/// `WaveformType` attributes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum WaveformKind {
    Square = 1,
    Triangle = 2,
    Noise = 3,
    Sawtooth = 4,
    Sine = 5,
    Custom = 6,
    Sample = 7,
}

impl TryFrom<i32> for WaveformKind {
    type Error = Error;

    fn try_from(v: i32) -> Result<Self> {
        Ok(match v {
            1 => WaveformKind::Square,
            2 => WaveformKind::Triangle,
            3 => WaveformKind::Noise,
            4 => WaveformKind::Sawtooth,
            5 => WaveformKind::Sine,
            6 => WaveformKind::Custom,
            7 => WaveformKind::Sample,
            other => return Err(Error::OutOfRange { kind: AttrKind::Waveform, value: i64::from(other) }),
        })
    }
}

impl WaveformKind {
    /// True for the built-in tables.
    pub fn is_preset(self) -> bool {
        !matches!(self, WaveformKind::Custom | WaveformKind::Sample)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Waveform {
    kind: WaveformKind,
    frames: Sequence<i16>,
}

impl Waveform {
    /// Custom waveform; fails with fewer than two frames.
    pub fn from_frames(frames: &[i16]) -> Result<Self> {
        check_len(frames.len())?;
        Ok(Self { kind: WaveformKind::Custom, frames: Sequence::from_values(frames) })
    }

    pub fn square() -> Shared<Waveform> { preset(WaveformKind::Square) }
    pub fn triangle() -> Shared<Waveform> { preset(WaveformKind::Triangle) }
    pub fn noise() -> Shared<Waveform> { preset(WaveformKind::Noise) }
    pub fn sawtooth() -> Shared<Waveform> { preset(WaveformKind::Sawtooth) }
    pub fn sine() -> Shared<Waveform> { preset(WaveformKind::Sine) }

    #[inline] pub fn kind(&self) -> WaveformKind { self.kind }
    #[inline] pub fn frames(&self) -> &[i16] { self.frames.values() }
    #[inline] pub fn len(&self) -> usize { self.frames.len() }
    #[inline] pub fn is_empty(&self) -> bool { self.frames.is_empty() }
    #[inline] pub fn sequence(&self) -> &Sequence<i16> { &self.frames }

    /// Replace the cycle. Presets are read-only.
    pub fn set_values(&mut self, frames: &[i16]) -> Result<()> {
        if self.kind.is_preset() {
            return Err(Error::ReadOnly);
        }
        check_len(frames.len())?;
        self.frames.replace_values(frames);
        Ok(())
    }

    fn build(kind: WaveformKind) -> Self {
        let a = PRESET_AMPLITUDE;
        let frames: Vec<i16> = match kind {
            WaveformKind::Square => (0..SQUARE_PHASES).map(|i| if i < 4 { a } else { -a }).collect(),
            WaveformKind::Triangle => (0..32)
                .map(|i| {
                    let step = if i < 16 { i } else { 31 - i };
                    (-i32::from(a) + step * 2 * i32::from(a) / 15) as i16
                })
                .collect(),
            WaveformKind::Noise => {
                let mut rng = StdRng::seed_from_u64(NOISE_SEED);
                (0..64).map(|_| if rng.gen::<bool>() { a } else { -a }).collect()
            }
            WaveformKind::Sawtooth => (0..16)
                .map(|i| (-i32::from(a) + i * 2 * i32::from(a) / 15) as i16)
                .collect(),
            WaveformKind::Sine => (0..32)
                .map(|i| (sin01(i as f32 / 32.0) * f32::from(a)) as i16)
                .collect(),
            WaveformKind::Custom | WaveformKind::Sample => vec![0; MIN_WAVEFORM_LEN],
        };
        Self { kind, frames: Sequence::from_values(&frames) }
    }
}

fn check_len(len: usize) -> Result<()> {
    if len < MIN_WAVEFORM_LEN {
        return Err(Error::InvalidLength { got: len, min: MIN_WAVEFORM_LEN });
    }
    Ok(())
}

/// Shared handle to a preset table. Non-preset kinds fall back to square.
pub fn preset(kind: WaveformKind) -> Shared<Waveform> {
    static PRESETS: OnceLock<[Shared<Waveform>; 5]> = OnceLock::new();
    let table = PRESETS.get_or_init(|| {
        [
            WaveformKind::Square,
            WaveformKind::Triangle,
            WaveformKind::Noise,
            WaveformKind::Sawtooth,
            WaveformKind::Sine,
        ]
        .map(|k| Shared::new(Waveform::build(k)))
    });
    let i = match kind {
        WaveformKind::Triangle => 1,
        WaveformKind::Noise => 2,
        WaveformKind::Sawtooth => 3,
        WaveformKind::Sine => 4,
        _ => 0,
    };
    table[i].clone()
}

impl Attributes for Waveform {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue> {
        match kind {
            AttrKind::WaveformType => Ok(AttrValue::Int(self.kind as i32)),
            AttrKind::NumFrames | AttrKind::NumPhases => Ok(AttrValue::Int(self.len() as i32)),
            k => Err(Error::UnknownAttribute(k)),
        }
    }

    fn set_attribute(&self, kind: AttrKind, _value: &AttrValue) -> Result<()> {
        match kind {
            AttrKind::WaveformType | AttrKind::NumFrames | AttrKind::NumPhases => Err(Error::ReadOnlyAttribute(kind)),
            k => Err(Error::UnknownAttribute(k)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_needs_two_frames() {
        assert!(matches!(Waveform::from_frames(&[1]), Err(Error::InvalidLength { got: 1, min: 2 })));
        let mut w = Waveform::from_frames(&[1, -1]).unwrap();
        assert!(w.set_values(&[0]).is_err());
        assert_eq!(w.frames(), &[1, -1]);
        w.set_values(&[0, 1, 2, 3]).unwrap();
        assert_eq!(w.len(), 4);
    }

    #[test]
    fn presets_are_shared_and_read_only() {
        let a = Waveform::square();
        let b = Waveform::square();
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(a.read().len(), SQUARE_PHASES);
        assert_eq!(a.write().set_values(&[0, 0, 0]), Err(Error::ReadOnly));
        assert!(!Shared::ptr_eq(&a, &Waveform::sine()));
    }

    #[test]
    fn preset_shapes() {
        let tri = Waveform::triangle();
        let tri = tri.read();
        assert_eq!(tri.frames()[0], -i16::MAX);
        assert_eq!(tri.frames()[15], i16::MAX);
        let saw = Waveform::sawtooth();
        let saw = saw.read();
        assert!(saw.frames().windows(2).all(|w| w[0] < w[1]));
        let noise = Waveform::noise();
        assert_eq!(noise.read().frames(), Waveform::noise().read().frames());
    }

    #[test]
    fn data_attributes() {
        let w = Waveform::from_frames(&[0; 8]).unwrap();
        assert_eq!(w.get_int(AttrKind::WaveformType).unwrap(), WaveformKind::Custom as i32);
        assert_eq!(w.get_int(AttrKind::NumFrames).unwrap(), 8);
        assert!(matches!(w.set_int(AttrKind::NumFrames, 3), Err(Error::ReadOnlyAttribute(_))));
        assert!(matches!(w.get_int(AttrKind::Note), Err(Error::UnknownAttribute(_))));
    }
}
