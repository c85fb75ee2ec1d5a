//! Uniform attribute protocol.
//!
//! Every addressable parameter has a stable integer tag ([`AttrKind`]). The tag
//! set is the wire contract with the C ABI and must not be renumbered: new
//! kinds get new tags. Tags are grouped by receiver in the upper bits
//! (`tag >> ATTR_GROUP_SHIFT`).
//!
//! Receivers implement [`Attributes::attribute`] / [`Attributes::set_attribute`]
//! over the tagged value [`AttrValue`]; the scalar, byte-block and integer-array
//! call shapes are provided on top of that pair.

use crate::error::{Error, Result};

pub const ATTR_GROUP_SHIFT: u32 = 12;

/// Receiver group encoded in the upper bits of an attribute tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AttrGroup {
    Context = 1,
    Track = 2,
    Data = 3,
    Effect = 4,
    Event = 5,
}

macro_rules! attr_kinds {
    ($( $(#[$m:meta])* $name:ident = $group:ident | $idx:literal ),* $(,)?) => {
        /// Attribute tag. Discriminants are stable across versions.
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i32)]
        pub enum AttrKind {
            $( $(#[$m])* $name = ((AttrGroup::$group as i32) << ATTR_GROUP_SHIFT) | $idx, )*
        }

        impl AttrKind {
            pub const ALL: &'static [AttrKind] = &[ $( AttrKind::$name, )* ];
        }

        impl TryFrom<i32> for AttrKind {
            type Error = Error;

            fn try_from(tag: i32) -> Result<Self> {
                $( if tag == AttrKind::$name as i32 { return Ok(AttrKind::$name); } )*
                Err(Error::UnknownTag(tag))
            }
        }
    };
}

attr_kinds! {
    // context
    NumChannels           = Context | 1,
    SampleRate            = Context | 2,
    /// Elapsed frames since creation or the last reset (read-only).
    Time                  = Context | 3,
    /// Engine ticks per second.
    ClockPeriod           = Context | 4,

    // track
    Waveform              = Track | 1,
    DutyCycle             = Track | 2,
    Period                = Track | 3,
    Phase                 = Track | 4,
    PhaseWrap             = Track | 5,
    NumPhases             = Track | 6,
    /// Also accepted by the context (output gain).
    MasterVolume          = Track | 7,
    Volume                = Track | 8,
    Volume0               = Track | 9,
    Volume1               = Track | 10,
    Volume2               = Track | 11,
    Volume3               = Track | 12,
    Volume4               = Track | 13,
    Volume5               = Track | 14,
    Volume6               = Track | 15,
    Volume7               = Track | 16,
    Mute                  = Track | 17,
    Pitch                 = Track | 18,
    SampleRange           = Track | 19,
    SampleRepeat          = Track | 20,
    SamplePeriod          = Track | 21,
    SamplePitch           = Track | 22,
    Note                  = Track | 23,
    Arpeggio              = Track | 24,
    Panning               = Track | 25,
    Instrument            = Track | 26,
    ArpeggioDivider       = Track | 27,
    EffectDivider         = Track | 28,
    InstrumentDivider     = Track | 29,
    TriangleIgnoresVolume = Track | 30,
    HaltSilentPhase       = Track | 31,

    // data
    NumFrames             = Data | 1,
    WaveformType          = Data | 2,

    // effects
    EffectVolumeSlide     = Effect | 1,
    EffectPanningSlide    = Effect | 2,
    EffectPortamento      = Effect | 3,
    EffectTremolo         = Effect | 4,
    EffectVibrato         = Effect | 5,

    // events
    EventClock            = Event | 1,
    EventDivider          = Event | 2,
    EventSampleBegin      = Event | 3,
    EventSampleReset      = Event | 4,
}

/// Maximum number of arpeggio offsets.
pub const MAX_ARPEGGIO: usize = 8;

/// Number of values in an effect tuple.
pub const EFFECT_VALUES: usize = 3;

/// Payload layout of an attribute.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shape {
    Int,
    Ints(usize),
}

impl AttrKind {
    #[inline]
    pub fn tag(self) -> i32 { self as i32 }

    pub fn group(self) -> AttrGroup {
        match (self as i32) >> ATTR_GROUP_SHIFT {
            1 => AttrGroup::Context,
            2 => AttrGroup::Track,
            3 => AttrGroup::Data,
            4 => AttrGroup::Effect,
            _ => AttrGroup::Event,
        }
    }

    pub fn is_effect(self) -> bool { self.group() == AttrGroup::Effect }

    /// Per-output-channel volume index for `Volume0..=Volume7`.
    pub fn channel_volume_index(self) -> Option<usize> {
        let t = self as i32;
        let lo = AttrKind::Volume0 as i32;
        let hi = AttrKind::Volume7 as i32;
        (lo..=hi).contains(&t).then(|| (t - lo) as usize)
    }

    pub fn shape(self) -> Shape {
        match self {
            AttrKind::SampleRange => Shape::Ints(2),
            AttrKind::Arpeggio => Shape::Ints(MAX_ARPEGGIO + 1),
            k if k.is_effect() => Shape::Ints(EFFECT_VALUES),
            _ => Shape::Int,
        }
    }

    /// Size in bytes of the raw block for this attribute.
    pub fn byte_size(self) -> usize {
        match self.shape() {
            Shape::Int => 4,
            Shape::Ints(n) => 4 * n,
        }
    }
}

/// Tagged attribute payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttrValue {
    Int(i32),
    /// Raw block; little-endian `i32`s.
    Bytes(Vec<u8>),
    Ints(Vec<i32>),
}

impl AttrValue {
    /// Scalar payload for `kind`, decoding a 4-byte block if needed.
    pub fn expect_int(&self, kind: AttrKind) -> Result<i32> {
        match self {
            AttrValue::Int(v) => Ok(*v),
            AttrValue::Ints(v) if v.len() == 1 => Ok(v[0]),
            AttrValue::Ints(v) => Err(Error::SizeMismatch { kind, expected: 1, got: v.len() }),
            AttrValue::Bytes(b) => {
                let arr: [u8; 4] = b
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::SizeMismatch { kind, expected: 4, got: b.len() })?;
                Ok(i32::from_le_bytes(arr))
            }
        }
    }

    /// Array payload of exactly `n` elements for `kind`.
    pub fn expect_ints(&self, kind: AttrKind, n: usize) -> Result<Vec<i32>> {
        match self {
            AttrValue::Int(_) => Err(Error::WrongShape(kind)),
            AttrValue::Ints(v) if v.len() == n => Ok(v.clone()),
            AttrValue::Ints(v) => Err(Error::SizeMismatch { kind, expected: n, got: v.len() }),
            AttrValue::Bytes(b) => {
                if b.len() != 4 * n {
                    return Err(Error::SizeMismatch { kind, expected: 4 * n, got: b.len() });
                }
                Ok(b.chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect())
            }
        }
    }

    /// Encode as a raw little-endian block.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            AttrValue::Int(v) => v.to_le_bytes().to_vec(),
            AttrValue::Bytes(b) => b.clone(),
            AttrValue::Ints(v) => v.iter().flat_map(|x| x.to_le_bytes()).collect(),
        }
    }
}

/// Uniform get/set surface. Implementations validate before writing: a
/// failing `set_attribute` leaves the receiver untouched.
pub trait Attributes {
    fn attribute(&self, kind: AttrKind) -> Result<AttrValue>;

    fn set_attribute(&self, kind: AttrKind, value: &AttrValue) -> Result<()>;

    fn get_int(&self, kind: AttrKind) -> Result<i32> {
        self.attribute(kind)?.expect_int(kind)
    }

    fn set_int(&self, kind: AttrKind, value: i32) -> Result<()> {
        if kind.shape() != Shape::Int {
            return Err(Error::WrongShape(kind));
        }
        self.set_attribute(kind, &AttrValue::Int(value))
    }

    /// Copy the raw block into `out`, which must be exactly the attribute's size.
    fn get_bytes(&self, kind: AttrKind, out: &mut [u8]) -> Result<()> {
        if out.len() != kind.byte_size() {
            return Err(Error::SizeMismatch { kind, expected: kind.byte_size(), got: out.len() });
        }
        let bytes = self.attribute(kind)?.to_bytes();
        if bytes.len() != out.len() {
            return Err(Error::SizeMismatch { kind, expected: bytes.len(), got: out.len() });
        }
        out.copy_from_slice(&bytes);
        Ok(())
    }

    fn set_bytes(&self, kind: AttrKind, bytes: &[u8]) -> Result<()> {
        if bytes.len() != kind.byte_size() {
            return Err(Error::SizeMismatch { kind, expected: kind.byte_size(), got: bytes.len() });
        }
        self.set_attribute(kind, &AttrValue::Bytes(bytes.to_vec()))
    }

    fn get_ints(&self, kind: AttrKind, out: &mut [i32]) -> Result<()> {
        let values = match self.attribute(kind)? {
            AttrValue::Int(v) => vec![v],
            other => other.expect_ints(kind, out.len())?,
        };
        if values.len() != out.len() {
            return Err(Error::SizeMismatch { kind, expected: values.len(), got: out.len() });
        }
        out.copy_from_slice(&values);
        Ok(())
    }

    fn set_ints(&self, kind: AttrKind, values: &[i32]) -> Result<()> {
        let expected = match kind.shape() {
            Shape::Int => 1,
            Shape::Ints(n) => n,
        };
        if values.len() != expected {
            return Err(Error::SizeMismatch { kind, expected, got: values.len() });
        }
        self.set_attribute(kind, &AttrValue::Ints(values.to_vec()))
    }
}

/// Domain check helper for implementors.
#[inline]
pub fn check_range(kind: AttrKind, value: i32, lo: i32, hi: i32) -> Result<i32> {
    if (lo..=hi).contains(&value) {
        Ok(value)
    } else {
        Err(Error::OutOfRange { kind, value: i64::from(value) })
    }
}
