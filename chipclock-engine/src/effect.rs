//! Per-track effects, advanced once per effect tick.
//!
//! Each effect is configured by a 3-value tuple (see [`AttrKind::shape`]):
//!
//! | effect        | values                               |
//! |---------------|--------------------------------------|
//! | volume slide  | `[steps, 0, 0]`                      |
//! | panning slide | `[steps, 0, 0]`                      |
//! | portamento    | `[steps, 0, 0]`                      |
//! | tremolo       | `[period, depth, depth_slide_steps]` |
//! | vibrato       | `[period, depth, depth_slide_steps]` |
//!
//! Slides make later changes of volume, panning or note glide over `steps`
//! ticks instead of jumping. Tremolo lowers the volume by up to `depth`
//! (volume units); vibrato bends the pitch by up to ±`depth` (fixed-point
//! semitones). `steps`/`period` of 0 disables the effect.

use chipclock_core::attr::{AttrKind, EFFECT_VALUES};
use chipclock_core::dsp::{semitones, sin01, MAX_VOLUME, NOTE_C8};
use chipclock_core::error::{Error, Result};

/// Effect tuple as stored and reported.
pub type EffectValues = [i32; EFFECT_VALUES];

/// Largest slide length or modulation period, in ticks.
pub const MAX_EFFECT_TICKS: i32 = 1 << 16;

/// Linear ramp between two integers over a number of steps.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Slide {
    from: i32,
    to: i32,
    steps: i32,
    tick: i32,
}

impl Slide {
    #[inline]
    pub const fn at(value: i32) -> Self { Self { from: value, to: value, steps: 0, tick: 0 } }

    #[inline]
    pub fn value(&self) -> i32 {
        if self.tick >= self.steps {
            return self.to;
        }
        let span = i64::from(self.to) - i64::from(self.from);
        (i64::from(self.from) + span * i64::from(self.tick) / i64::from(self.steps)) as i32
    }

    #[inline] pub fn target(&self) -> i32 { self.to }
    #[inline] pub fn is_done(&self) -> bool { self.tick >= self.steps }

    /// Start gliding from the current value to `to`; `steps == 0` jumps.
    pub fn slide_to(&mut self, to: i32, steps: i32) {
        *self = Self { from: self.value(), to, steps: steps.max(0), tick: 0 };
    }

    #[inline]
    pub fn jump(&mut self, value: i32) { *self = Self::at(value); }

    /// Finish the running glide immediately.
    #[inline]
    pub fn settle(&mut self) { self.jump(self.to); }

    #[inline]
    pub fn step(&mut self) {
        if self.tick < self.steps {
            self.tick += 1;
        }
    }
}

/// Periodic modulation with a sliding depth.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Oscillation {
    period: i32,
    depth: Slide,
    phase: i32,
}

impl Oscillation {
    /// Current offset in `-depth..=depth`; 0 when disabled.
    pub fn value(&self) -> i32 {
        let depth = self.depth.value();
        if self.period <= 0 || depth == 0 {
            return 0;
        }
        (sin01(self.phase as f32 / self.period as f32) * depth as f32) as i32
    }

    #[inline] pub fn depth(&self) -> i32 { self.depth.value() }

    fn configure(&mut self, period: i32, depth: i32, slide_steps: i32) {
        self.period = period;
        if period > 0 {
            self.phase %= period;
        } else {
            self.phase = 0;
        }
        self.depth.slide_to(depth, slide_steps);
    }

    fn step(&mut self) {
        if self.period > 0 {
            self.phase = (self.phase + 1) % self.period;
        }
        self.depth.step();
    }

    fn restart(&mut self) {
        self.phase = 0;
        self.depth.settle();
    }
}

const KINDS: [AttrKind; 5] = [
    AttrKind::EffectVolumeSlide,
    AttrKind::EffectPanningSlide,
    AttrKind::EffectPortamento,
    AttrKind::EffectTremolo,
    AttrKind::EffectVibrato,
];

fn slot(kind: AttrKind) -> Result<usize> {
    KINDS.iter().position(|&k| k == kind).ok_or(Error::UnknownAttribute(kind))
}

/// Effect state of one voice.
#[derive(Clone, Debug)]
pub struct Effects {
    raw: [EffectValues; 5],
    pub volume: Slide,
    pub panning: Slide,
    pub note: Slide,
    pub tremolo: Oscillation,
    pub vibrato: Oscillation,
}

impl Effects {
    pub fn new(volume: i32, panning: i32) -> Self {
        Self {
            raw: [[0; EFFECT_VALUES]; 5],
            volume: Slide::at(volume),
            panning: Slide::at(panning),
            note: Slide::at(0),
            tremolo: Oscillation::default(),
            vibrato: Oscillation::default(),
        }
    }

    pub fn get(&self, kind: AttrKind) -> Result<EffectValues> {
        Ok(self.raw[slot(kind)?])
    }

    /// Validate and apply an effect tuple. Nothing changes on error.
    pub fn set(&mut self, kind: AttrKind, values: EffectValues) -> Result<()> {
        let i = slot(kind)?;
        let [a, b, c] = values;
        let ticks = |v: i32| -> Result<i32> {
            if (0..=MAX_EFFECT_TICKS).contains(&v) {
                Ok(v)
            } else {
                Err(Error::OutOfRange { kind, value: i64::from(v) })
            }
        };
        let depth = |v: i32, max: i32| -> Result<i32> {
            if (0..=max).contains(&v) {
                Ok(v)
            } else {
                Err(Error::OutOfRange { kind, value: i64::from(v) })
            }
        };
        match kind {
            AttrKind::EffectTremolo => {
                let (p, d, s) = (ticks(a)?, depth(b, MAX_VOLUME)?, ticks(c)?);
                self.tremolo.configure(p, d, s);
            }
            AttrKind::EffectVibrato => {
                let (p, d, s) = (ticks(a)?, depth(b, semitones(NOTE_C8))?, ticks(c)?);
                self.vibrato.configure(p, d, s);
            }
            _ => {
                ticks(a)?;
            }
        }
        self.raw[i] = values;
        Ok(())
    }

    #[inline] pub fn volume_steps(&self) -> i32 { self.raw[0][0] }
    #[inline] pub fn panning_steps(&self) -> i32 { self.raw[1][0] }
    #[inline] pub fn portamento_steps(&self) -> i32 { self.raw[2][0] }

    /// Volume reduction from tremolo, in `0..=depth`.
    #[inline]
    pub fn tremolo_cut(&self) -> i32 {
        (self.tremolo.depth() + self.tremolo.value()) / 2
    }

    /// One effect tick.
    pub fn step(&mut self) {
        self.volume.step();
        self.panning.step();
        self.note.step();
        self.tremolo.step();
        self.vibrato.step();
    }

    /// Drop transient motion; configured tuples stay.
    pub fn settle(&mut self) {
        self.volume.settle();
        self.panning.settle();
        self.note.settle();
        self.tremolo.restart();
        self.vibrato.restart();
    }
}
