//! Envelope phases, ADSR conversion and the per-tick sequence cursor.
//!
//! Instruments store parameter sequences in one of two formats:
//! - plain values: one value per tick
//! - envelope phases: `(steps, value)` pairs, linearly interpolated from the
//!   previous value to `value` over `steps` ticks
//!
//! While a note is held the cursor loops inside the sequence's sustain range;
//! on release it jumps past the range and runs to the end, then holds the
//! last value. Everything here is integer math, advanced once per tick.

use core::ops::Range;

use crate::dsp::MAX_VOLUME;
use crate::error::{Error, Result};
use crate::sequence::{Sequence, SequenceValue};

/// One envelope segment: reach `value` after `steps` ticks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Phase {
    pub steps: i32,
    pub value: i32,
}

impl Phase {
    #[inline]
    pub const fn new(steps: i32, value: i32) -> Self { Self { steps, value } }
}

impl SequenceValue for Phase {
    const COMPONENTS: usize = 2;
}

/// Attack/decay/release in ticks, sustain as a volume level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Adsr {
    pub attack: i32,
    pub decay: i32,
    pub sustain: i32,
    pub release: i32,
}

impl Default for Adsr {
    fn default() -> Self {
        Self { attack: 0, decay: 0, sustain: MAX_VOLUME, release: 0 }
    }
}

impl Adsr {
    /// Validated constructor; every parameter must be non-negative and the
    /// sustain level must not exceed `MAX_VOLUME`.
    pub fn new(attack: i64, decay: i64, sustain: i64, release: i64) -> Result<Self> {
        let err = || Error::InvalidEnvelope { attack, decay, sustain, release };
        if attack < 0 || decay < 0 || sustain < 0 || release < 0 || sustain > i64::from(MAX_VOLUME) {
            return Err(err());
        }
        let fit = |x: i64| i32::try_from(x).map_err(|_| err());
        Ok(Self { attack: fit(attack)?, decay: fit(decay)?, sustain: fit(sustain)?, release: fit(release)? })
    }

    /// Envelope phases and sustain range representing this ADSR.
    pub fn phases(&self) -> ([Phase; 4], Range<usize>) {
        (
            [
                Phase::new(self.attack, MAX_VOLUME),
                Phase::new(self.decay, self.sustain),
                Phase::new(1, self.sustain),
                Phase::new(self.release, 0),
            ],
            2..3,
        )
    }
}

/// Playback position inside one instrument sequence.
#[derive(Copy, Clone, Debug, Default)]
pub struct Cursor {
    index: usize,
    tick: i32,
    from: i32,
    value: i32,
    released: bool,
    active: bool,
}

impl Cursor {
    #[inline] pub fn value(&self) -> i32 { self.value }
    #[inline] pub fn is_active(&self) -> bool { self.active }

    /// Stop and hold `value`.
    pub fn halt(&mut self, value: i32) {
        self.active = false;
        self.value = value;
    }

    // ------------------------------ plain values ------------------------------

    pub fn start_values(&mut self, seq: &Sequence<i32>) -> i32 {
        *self = Self::default();
        match seq.value_at(0) {
            Some(&v) => {
                self.active = true;
                self.value = v;
            }
            None => self.active = false,
        }
        self.value
    }

    pub fn step_values(&mut self, seq: &Sequence<i32>) -> i32 {
        if !self.active {
            return self.value;
        }
        match self.next_index(seq.sustain_range(), seq.len()) {
            Some(i) => {
                self.index = i;
                self.value = seq.values()[i];
            }
            None => self.active = false,
        }
        self.value
    }

    pub fn release_values(&mut self, seq: &Sequence<i32>) -> i32 {
        if self.jump_past_sustain(seq.sustain_range(), seq.len()) {
            self.value = seq.values()[self.index];
        }
        self.value
    }

    // ----------------------------- envelope phases ----------------------------

    /// Start from `initial` and run the first phase.
    pub fn start_phases(&mut self, seq: &Sequence<Phase>, initial: i32) -> i32 {
        *self = Self { from: initial, value: initial, active: !seq.is_empty(), ..Self::default() };
        self.settle(seq);
        self.value
    }

    pub fn step_phases(&mut self, seq: &Sequence<Phase>) -> i32 {
        if !self.active {
            return self.value;
        }
        let Some(&p) = seq.value_at(self.index) else {
            self.active = false;
            return self.value;
        };
        self.tick += 1;
        if self.tick >= p.steps {
            self.value = p.value;
            self.advance_phase(seq);
            self.settle(seq);
        } else {
            let span = i64::from(p.value) - i64::from(self.from);
            self.value = (i64::from(self.from) + span * i64::from(self.tick) / i64::from(p.steps)) as i32;
        }
        self.value
    }

    pub fn release_phases(&mut self, seq: &Sequence<Phase>) -> i32 {
        if self.jump_past_sustain(seq.sustain_range(), seq.len()) {
            self.tick = 0;
            self.from = self.value;
            self.settle(seq);
        }
        self.value
    }

    // --------------------------------- shared ---------------------------------

    fn next_index(&self, sustain: Range<usize>, len: usize) -> Option<usize> {
        let mut next = self.index + 1;
        if !self.released && !sustain.is_empty() && next >= sustain.end {
            next = sustain.start;
        }
        (next < len).then_some(next)
    }

    /// Mark released; returns true when the cursor moved to a new index.
    fn jump_past_sustain(&mut self, sustain: Range<usize>, len: usize) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        if sustain.is_empty() || !sustain.contains(&self.index) {
            return false;
        }
        if sustain.end < len {
            self.index = sustain.end;
            self.active = true;
            true
        } else {
            self.active = false;
            false
        }
    }

    fn advance_phase(&mut self, seq: &Sequence<Phase>) {
        match self.next_index(seq.sustain_range(), seq.len()) {
            Some(i) => {
                self.index = i;
                self.tick = 0;
                self.from = self.value;
            }
            None => self.active = false,
        }
    }

    /// Apply zero-length phases immediately. Bounded so a sustain range made
    /// only of zero-length phases cannot spin.
    fn settle(&mut self, seq: &Sequence<Phase>) {
        for _ in 0..=seq.len() {
            if !self.active {
                return;
            }
            match seq.value_at(self.index) {
                Some(p) if p.steps <= 0 => {
                    self.value = p.value;
                    self.advance_phase(seq);
                }
                Some(_) => return,
                None => {
                    self.active = false;
                    return;
                }
            }
        }
    }
}

// ------------------------------------ Tests --------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn adsr_seq(a: i64, d: i64, s: i64, r: i64) -> Sequence<Phase> {
        let (phases, sustain) = Adsr::new(a, d, s, r).unwrap().phases();
        let mut seq = Sequence::from_values(&phases);
        seq.set_sustain_range(sustain).unwrap();
        seq
    }

    #[test]
    fn adsr_reaches_sustain_and_releases() {
        let seq = adsr_seq(4, 4, 1000, 8);
        let mut c = Cursor::default();
        assert_eq!(c.start_phases(&seq, 0), 0);
        for _ in 0..4 { c.step_phases(&seq); }
        assert_eq!(c.value(), MAX_VOLUME);
        for _ in 0..4 { c.step_phases(&seq); }
        assert_eq!(c.value(), 1000);
        for _ in 0..100 { c.step_phases(&seq); }
        assert_eq!(c.value(), 1000, "held in sustain");
        c.release_phases(&seq);
        for _ in 0..8 { c.step_phases(&seq); }
        assert_eq!(c.value(), 0);
        assert!(!c.is_active());
    }

    #[test]
    fn zero_attack_is_instant() {
        let seq = adsr_seq(0, 0, 500, 0);
        let mut c = Cursor::default();
        assert_eq!(c.start_phases(&seq, 0), 500);
        c.release_phases(&seq);
        assert_eq!(c.value(), 0);
    }

    #[test]
    fn negative_adsr_is_rejected() {
        assert!(Adsr::new(-1, 0, 0, 0).is_err());
        assert!(Adsr::new(0, 0, i64::from(MAX_VOLUME) + 1, 0).is_err());
        assert!(Adsr::new(1, 2, 3, 4).is_ok());
    }

    #[test]
    fn values_loop_in_sustain_until_release() {
        let mut seq = Sequence::from_values(&[1, 2, 3, 4, 5]);
        seq.set_sustain_range(1..3).unwrap();
        let mut c = Cursor::default();
        let mut seen = vec![c.start_values(&seq)];
        for _ in 0..5 { seen.push(c.step_values(&seq)); }
        assert_eq!(seen, [1, 2, 3, 2, 3, 2]);
        assert_eq!(c.release_values(&seq), 4);
        assert_eq!(c.step_values(&seq), 5);
        assert_eq!(c.step_values(&seq), 5);
        assert!(!c.is_active());
    }

    #[test]
    fn interpolates_linearly() {
        let seq = Sequence::from_values(&[Phase::new(4, 400)]);
        let mut c = Cursor::default();
        c.start_phases(&seq, 0);
        let v: Vec<i32> = (0..4).map(|_| c.step_phases(&seq)).collect();
        assert_eq!(v, [100, 200, 300, 400]);
    }
}
