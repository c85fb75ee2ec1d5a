//! Error types shared by the data model, the attribute protocol and the engine.

use thiserror::Error;

use crate::attr::AttrKind;

/// Precondition and attribute failures. Every operation that returns one of
/// these has left its receiver unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Object is already attached to a context
    #[error("already attached to a context")]
    AlreadyAttached,

    /// Operation needs an attached object
    #[error("not attached to a context")]
    NotAttached,

    /// Divider tick count must be positive
    #[error("invalid tick count: {0}")]
    InvalidTicks(i64),

    /// Too few values for the object (waveforms need at least 2)
    #[error("invalid length {got}, need at least {min}")]
    InvalidLength { got: usize, min: usize },

    /// ADSR parameters must be non-negative
    #[error("invalid envelope: attack={attack} decay={decay} sustain={sustain} release={release}")]
    InvalidEnvelope { attack: i64, decay: i64, sustain: i64, release: i64 },

    /// Range does not fit inside `[0, len]`
    #[error("range {start}..{end} out of bounds for length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    /// Preset waveforms cannot be modified
    #[error("object is read-only")]
    ReadOnly,

    /// Context configuration rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Attribute kind not handled by the receiver
    #[error("attribute {0:?} not supported by this object")]
    UnknownAttribute(AttrKind),

    /// Integer tag not part of the attribute enumeration
    #[error("unknown attribute tag {0}")]
    UnknownTag(i32),

    /// Attribute is readable but not writable
    #[error("attribute {0:?} is read-only")]
    ReadOnlyAttribute(AttrKind),

    /// Payload size or element count did not match the attribute
    #[error("attribute {kind:?}: expected {expected} elements, got {got}")]
    SizeMismatch { kind: AttrKind, expected: usize, got: usize },

    /// Payload shape (int / bytes / ints) did not match the attribute
    #[error("attribute {0:?}: wrong value shape")]
    WrongShape(AttrKind),

    /// Attribute cannot change while the context is rendering
    #[error("attribute {0:?} cannot change during a render pass")]
    Busy(AttrKind),

    /// Value outside the attribute's domain
    #[error("attribute {kind:?}: value {value} out of range")]
    OutOfRange { kind: AttrKind, value: i64 },
}

/// Failures while decoding sample data from raw or WAVE content.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Reading the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content could not be parsed
    #[error("format error: {0}")]
    Format(String),

    /// Decoded buffer could not be allocated
    #[error("allocation of {0} frames failed")]
    Alloc(usize),
}

impl From<hound::Error> for LoadError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => LoadError::Io(io),
            other => LoadError::Format(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
