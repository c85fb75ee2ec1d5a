//! chipclock engine: context, tracks, dividers and audio output.
//!
//! Crate layout:
//! - [`clock`]    : frame to tick conversion without drift
//! - [`voice`]    : reference synthesis channel behind each track
//! - [`effect`]   : slides, tremolo and vibrato, stepped per effect tick
//! - [`context`]  : `Context`, the locked owner of tracks and dividers
//! - [`track`]    : attachable `Track` handles and the attribute surface
//! - [`divider`]  : periodic tick callbacks
//! - [`output`]   : `AudioOutput` over an `OutputBackend` (`cpal` with `realtime`)
//! - [`compiler`] : script compiler seam and name registry
//!
//! The render path does not allocate: the mix buffer is preallocated per
//! context and voices read bound data through shared read guards.

pub mod clock;
pub mod compiler;
pub mod context;
pub mod divider;
pub mod effect;
pub mod error;
pub mod output;
pub mod track;
pub mod voice;

// Re-export some commonly used items to make downstream imports ergonomic.
pub use chipclock_core as core;
pub use compiler::{CompileError, Library, ScriptCompiler};
pub use context::{Context, ContextConfig, ContextGuard};
pub use divider::{Divider, TickEvent};
pub use error::{Error, OutputError, Result};
pub use output::{AudioOutput, OutputBackend, OutputState, RenderFn};
pub use track::Track;

#[cfg(feature = "realtime")]
pub use output::CpalBackend;

pub mod prelude {
    pub use crate::{AudioOutput, Context, ContextConfig, Divider, OutputBackend, TickEvent, Track};
    pub use chipclock_core::prelude::*;
}
