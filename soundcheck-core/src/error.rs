//! Error types for the game engine and its collaborators

use thiserror::Error;

/// Failures of the attempts history backing store.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// The store could not be read or written
    #[error("History store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted data exists but is not a list of attempt counts
    #[error("History data is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failures while loading a game configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// The file parsed but describes an unplayable game
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Failures reported by the audio collaborator.
#[derive(Debug, Error)]
pub enum AudioError {
    /// No input or output device is available
    #[error("No audio {0} device available")]
    NoDevice(&'static str),

    /// The device offers no usable stream format
    #[error("No suitable f32 {0} format found")]
    UnsupportedConfig(&'static str),

    /// The requested instrument is not known to the voice
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    /// The audio thread has shut down
    #[error("Audio thread is no longer running")]
    Disconnected,
}
