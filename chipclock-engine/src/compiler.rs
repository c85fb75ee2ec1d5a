//! Binding surface for music-script compilers.
//!
//! A compiler turns script text into named instruments, waveforms and samples
//! and collects them in a [`Library`]. The script language itself lives
//! outside this crate; only the compile/lookup surface is defined here.

use std::collections::BTreeMap;

use chipclock_core::instrument::Instrument;
use chipclock_core::sample::Sample;
use chipclock_core::shared::Shared;
use chipclock_core::waveform::Waveform;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// Script text is not valid UTF-8
    #[error("script is not valid UTF-8 (at byte {0})")]
    Encoding(usize),

    /// Parser rejected the script
    #[error("syntax error on line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// Script parsed but refers to something invalid
    #[error("{0}")]
    Semantic(String),
}

/// Name to object registry filled by a compiler.
#[derive(Clone, Debug, Default)]
pub struct Library {
    instruments: BTreeMap<String, Shared<Instrument>>,
    waveforms: BTreeMap<String, Shared<Waveform>>,
    samples: BTreeMap<String, Shared<Sample>>,
}

impl Library {
    pub fn new() -> Self { Self::default() }

    /// Register under `name`, returning the object it replaced.
    pub fn insert_instrument(&mut self, name: impl Into<String>, v: Shared<Instrument>) -> Option<Shared<Instrument>> {
        self.instruments.insert(name.into(), v)
    }

    pub fn insert_waveform(&mut self, name: impl Into<String>, v: Shared<Waveform>) -> Option<Shared<Waveform>> {
        self.waveforms.insert(name.into(), v)
    }

    pub fn insert_sample(&mut self, name: impl Into<String>, v: Shared<Sample>) -> Option<Shared<Sample>> {
        self.samples.insert(name.into(), v)
    }

    pub fn instrument(&self, name: &str) -> Option<Shared<Instrument>> { self.instruments.get(name).cloned() }
    pub fn waveform(&self, name: &str) -> Option<Shared<Waveform>> { self.waveforms.get(name).cloned() }
    pub fn sample(&self, name: &str) -> Option<Shared<Sample>> { self.samples.get(name).cloned() }

    pub fn instrument_names(&self) -> impl Iterator<Item = &str> { self.instruments.keys().map(String::as_str) }
    pub fn waveform_names(&self) -> impl Iterator<Item = &str> { self.waveforms.keys().map(String::as_str) }
    pub fn sample_names(&self) -> impl Iterator<Item = &str> { self.samples.keys().map(String::as_str) }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty() && self.waveforms.is_empty() && self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.instruments.clear();
        self.waveforms.clear();
        self.samples.clear();
    }
}

/// A script front end.
///
/// Implementors provide [`compile_str`](Self::compile_str) and the library
/// accessors; byte input and lookups are built on top.
pub trait ScriptCompiler {
    fn compile_str(&mut self, script: &str) -> Result<(), CompileError>;

    fn library(&self) -> &Library;

    fn library_mut(&mut self) -> &mut Library;

    fn compile_bytes(&mut self, bytes: &[u8]) -> Result<(), CompileError> {
        let text = std::str::from_utf8(bytes).map_err(|e| CompileError::Encoding(e.valid_up_to()))?;
        self.compile_str(text)
    }

    fn instrument(&self, name: &str) -> Option<Shared<Instrument>> { self.library().instrument(name) }
    fn waveform(&self, name: &str) -> Option<Shared<Waveform>> { self.library().waveform(name) }
    fn sample(&self, name: &str) -> Option<Shared<Sample>> { self.library().sample(name) }

    /// Forget everything compiled so far.
    fn clear(&mut self) {
        self.library_mut().clear();
    }
}
