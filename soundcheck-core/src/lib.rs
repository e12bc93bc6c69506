// soundcheck-core/src/lib.rs

//! The core logic for the Sound Check ear-training game.
//! This crate classifies detected pitches into notes, runs the round
//! state machine, keeps the attempts history, and drives the audio
//! devices. It is completely headless and contains no GUI code.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod fft;
pub mod history;
pub mod note;
pub mod pitch;
pub mod voice;

pub use config::GameConfig;
pub use engine::{
    AudioIo, EngineEvent, Feedback, GameSnapshot, Phase, PlaybackRequest, PlaybackToken,
    RoundEngine,
};
pub use error::{AudioError, ConfigError, HistoryError};
pub use history::{AttemptsHistory, HistoryStore, JsonFileStore, MemoryStore};
pub use note::{Note, NoteName, frequency_to_note};

/// A single pitch estimate from the microphone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchSample {
    /// The detected fundamental frequency in Hz.
    pub frequency: f32,
    /// Peak level of the analysed frame (0.0 to 1.0 for unclipped input).
    pub amplitude: f32,
}
