//! Instruments: per-parameter sequences applied to a track every instrument
//! tick while a note plays.
//!
//! Sequence units follow [`crate::dsp`]: volume in `0..=MAX_VOLUME` (scales
//! the track volume), panning offsets, arpeggio/pitch offsets in fixed-point
//! semitones, duty cycle as an absolute value.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::envelope::{Adsr, Phase};
use crate::error::{Error, Result};
use crate::sequence::Sequence;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SequenceKind {
    Volume,
    Panning,
    Arpeggio,
    Pitch,
    DutyCycle,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 5] = [
        SequenceKind::Volume,
        SequenceKind::Panning,
        SequenceKind::Arpeggio,
        SequenceKind::Pitch,
        SequenceKind::DutyCycle,
    ];
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SequenceFormat {
    Values,
    Envelope,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SequenceData {
    Values(Sequence<i32>),
    Envelope(Sequence<Phase>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstrumentSequence {
    kind: SequenceKind,
    data: SequenceData,
    enabled: bool,
}

impl InstrumentSequence {
    fn empty(kind: SequenceKind) -> Self {
        Self { kind, data: SequenceData::Values(Sequence::default()), enabled: true }
    }

    #[inline] pub fn kind(&self) -> SequenceKind { self.kind }
    #[inline] pub fn data(&self) -> &SequenceData { &self.data }
    #[inline] pub fn is_enabled(&self) -> bool { self.enabled }
    #[inline] pub fn set_enabled(&mut self, enabled: bool) { self.enabled = enabled; }

    pub fn format(&self) -> SequenceFormat {
        match self.data {
            SequenceData::Values(_) => SequenceFormat::Values,
            SequenceData::Envelope(_) => SequenceFormat::Envelope,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            SequenceData::Values(s) => s.len(),
            SequenceData::Envelope(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn values(&self) -> Option<&[i32]> {
        match &self.data {
            SequenceData::Values(s) => Some(s.values()),
            SequenceData::Envelope(_) => None,
        }
    }

    pub fn phases(&self) -> Option<&[Phase]> {
        match &self.data {
            SequenceData::Envelope(s) => Some(s.values()),
            SequenceData::Values(_) => None,
        }
    }

    pub fn sustain_range(&self) -> Range<usize> {
        match &self.data {
            SequenceData::Values(s) => s.sustain_range(),
            SequenceData::Envelope(s) => s.sustain_range(),
        }
    }

    pub fn set_sustain_range(&mut self, range: Range<usize>) -> Result<()> {
        match &mut self.data {
            SequenceData::Values(s) => s.set_sustain_range(range),
            SequenceData::Envelope(s) => s.set_sustain_range(range),
        }
    }

    /// Replace with one value per tick.
    pub fn set_sequence_values(&mut self, values: &[i32], sustain: Range<usize>) -> Result<()> {
        check_sustain(&sustain, values.len())?;
        match &mut self.data {
            SequenceData::Values(s) => s.replace_values(values),
            other => *other = SequenceData::Values(Sequence::from_values(values)),
        }
        self.set_sustain_range(sustain)
    }

    /// Replace with interpolated phases; every phase needs non-negative steps.
    pub fn set_envelope_phases(&mut self, phases: &[Phase], sustain: Range<usize>) -> Result<()> {
        check_sustain(&sustain, phases.len())?;
        if let Some(i) = phases.iter().position(|p| p.steps < 0) {
            return Err(Error::InvalidRange { start: i, end: i + 1, len: phases.len() });
        }
        match &mut self.data {
            SequenceData::Envelope(s) => s.replace_values(phases),
            other => *other = SequenceData::Envelope(Sequence::from_values(phases)),
        }
        self.set_sustain_range(sustain)
    }

    pub fn set_envelope_adsr(&mut self, attack: i64, decay: i64, sustain: i64, release: i64) -> Result<()> {
        let adsr = Adsr::new(attack, decay, sustain, release)?;
        let (phases, range) = adsr.phases();
        self.set_envelope_phases(&phases, range)
    }
}

fn check_sustain(range: &Range<usize>, len: usize) -> Result<()> {
    if range.start > range.end || range.end > len {
        return Err(Error::InvalidRange { start: range.start, end: range.end, len });
    }
    Ok(())
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Instrument {
    adsr: Adsr,
    sequences: BTreeMap<SequenceKind, InstrumentSequence>,
}

impl Instrument {
    pub fn new() -> Self { Self::default() }

    /// Instrument whose volume sequence is the given ADSR envelope.
    pub fn with_adsr(attack: i64, decay: i64, sustain: i64, release: i64) -> Result<Self> {
        let mut i = Self::new();
        i.set_envelope_adsr(attack, decay, sustain, release)?;
        Ok(i)
    }

    #[inline] pub fn adsr(&self) -> Adsr { self.adsr }

    #[inline]
    pub fn sequence(&self, kind: SequenceKind) -> Option<&InstrumentSequence> {
        self.sequences.get(&kind)
    }

    /// Sequence for `kind`, created empty on first access.
    pub fn sequence_mut(&mut self, kind: SequenceKind) -> &mut InstrumentSequence {
        self.sequences.entry(kind).or_insert_with(|| InstrumentSequence::empty(kind))
    }

    pub fn remove_sequence(&mut self, kind: SequenceKind) -> Option<InstrumentSequence> {
        self.sequences.remove(&kind)
    }

    pub fn sequences(&self) -> impl Iterator<Item = &InstrumentSequence> {
        self.sequences.values()
    }

    /// Validate, store as the default ADSR and rewrite the volume envelope in place.
    pub fn set_envelope_adsr(&mut self, attack: i64, decay: i64, sustain: i64, release: i64) -> Result<()> {
        let adsr = Adsr::new(attack, decay, sustain, release)?;
        self.sequence_mut(SequenceKind::Volume).set_envelope_adsr(attack, decay, sustain, release)?;
        self.adsr = adsr;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::MAX_VOLUME;

    #[test]
    fn adsr_rewrites_volume_envelope() {
        let mut i = Instrument::with_adsr(2, 4, 1000, 8).unwrap();
        let vol = i.sequence(SequenceKind::Volume).unwrap();
        assert_eq!(vol.format(), SequenceFormat::Envelope);
        assert_eq!(vol.phases().unwrap()[0], Phase::new(2, MAX_VOLUME));
        assert_eq!(vol.sustain_range(), 2..3);

        i.set_envelope_adsr(0, 0, 500, 1).unwrap();
        assert_eq!(i.adsr().sustain, 500);
        assert_eq!(i.sequence(SequenceKind::Volume).unwrap().phases().unwrap()[1], Phase::new(0, 500));
    }

    #[test]
    fn invalid_adsr_changes_nothing() {
        let mut i = Instrument::with_adsr(1, 1, 100, 1).unwrap();
        let before = i.clone();
        assert!(i.set_envelope_adsr(1, -1, 100, 1).is_err());
        assert_eq!(i, before);
    }

    #[test]
    fn sequence_keys_are_unique() {
        let mut i = Instrument::new();
        i.sequence_mut(SequenceKind::Arpeggio).set_sequence_values(&[0, 4, 7], 0..3).unwrap();
        i.sequence_mut(SequenceKind::Arpeggio).set_sequence_values(&[0, 3], 0..2).unwrap();
        assert_eq!(i.sequences().count(), 1);
        assert_eq!(i.sequence(SequenceKind::Arpeggio).unwrap().values(), Some(&[0, 3][..]));
    }

    #[test]
    fn sustain_must_fit() {
        let mut i = Instrument::new();
        let seq = i.sequence_mut(SequenceKind::Pitch);
        assert!(seq.set_sequence_values(&[1, 2], 1..3).is_err());
        assert!(seq.is_empty());
        assert!(seq.set_envelope_phases(&[Phase::new(-1, 0)], 0..0).is_err());
        seq.set_envelope_phases(&[Phase::new(3, 10)], 0..1).unwrap();
        assert_eq!(seq.format(), SequenceFormat::Envelope);
    }
}
