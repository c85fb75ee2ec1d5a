//! Engine-side errors. Precondition and attribute failures reuse
//! [`chipclock_core::Error`]; this module adds the audio output failures.

use thiserror::Error;

pub use chipclock_core::error::{Error, Result};

/// Failures opening or driving an output stream.
#[derive(Error, Debug)]
pub enum OutputError {
    /// No default output device
    #[error("no output device available")]
    NoDevice,

    /// Device rejected the stream configuration
    #[error("unsupported stream configuration: {0}")]
    Config(String),

    /// Stream could not be created
    #[error("failed to build output stream: {0}")]
    Build(String),

    /// Stream could not be started or resumed
    #[error("failed to start output stream: {0}")]
    Play(String),

    /// Stream could not be paused
    #[error("failed to pause output stream: {0}")]
    Pause(String),
}
