//! chipclock core: the data model behind the sequencing context.
//!
//! Features
//! - `fast-math`: polynomial sine when building the sine preset table
//!
//! Modules
//! - [`attr`]       : attribute tags, tagged values, the `Attributes` protocol
//! - [`dsp`]        : fixed-point units, pitch math, mixing helpers
//! - [`envelope`]   : envelope phases, ADSR conversion, per-tick cursor
//! - [`sequence`]   : growable value buffer with a sustain range
//! - [`waveform`]   : preset and custom single-cycle tables
//! - [`sample`]     : decoded PCM (raw and WAVE)
//! - [`instrument`] : per-parameter sequences plus default ADSR
//! - [`shared`]     : `Shared<T>` handles used to bind data to tracks
//!
//! Nothing here touches the audio thread directly; the engine crate reads
//! these objects through [`Shared`] read guards while rendering.

pub mod attr;
pub mod dsp;
pub mod envelope;
pub mod error;
pub mod instrument;
pub mod sample;
pub mod sequence;
pub mod shared;
pub mod waveform;

pub use attr::{AttrKind, AttrValue, Attributes};
pub use error::{Error, LoadError, Result};
pub use instrument::{Instrument, InstrumentSequence, SequenceFormat, SequenceKind};
pub use sample::{RawFormat, Sample};
pub use sequence::Sequence;
pub use shared::Shared;
pub use waveform::{Waveform, WaveformKind};

/// Commonly used types/functions for convenience:
pub mod prelude {
    pub use crate::attr::{AttrKind, AttrValue, Attributes};
    pub use crate::dsp::{
        semitones, FINT20_UNIT, MAX_VOLUME, NOTE_A4, NOTE_C0, NOTE_C8, NOTE_MUTE, NOTE_RELEASE, NO_REPEAT,
        PALINDROME, REPEAT,
    };
    pub use crate::envelope::{Adsr, Phase};
    pub use crate::instrument::{Instrument, SequenceKind};
    pub use crate::sample::{RawFormat, Sample};
    pub use crate::shared::Shared;
    pub use crate::waveform::{Waveform, WaveformKind};
}

#[cfg(test)]
mod smoke {

    #[test]
    fn prelude_exists() {
        use crate::prelude::*;
        let _ = semitones(NOTE_A4);
        let _ = Instrument::with_adsr(1, 2, MAX_VOLUME as i64 / 2, 4).unwrap();
        let w = Waveform::sine();
        assert_eq!(w.read().kind(), WaveformKind::Sine);
    }
}
