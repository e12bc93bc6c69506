//! # Game Configuration Module
//!
//! Tunable constants of the game: the range target notes are drawn from, the
//! noise gate, playback timing and the instrument set. Every field has a
//! default, so a config file only needs to name what it changes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::history::DEFAULT_CAPACITY;
use crate::note::{Note, HIGHEST_NOTE};

/// Longest note or settle time accepted, in seconds.
pub const MAX_DURATION_SECS: f32 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    /// Lowest note a round may ask for (inclusive)
    pub lowest_note: u8,
    /// Highest note a round may ask for (inclusive)
    pub highest_note: u8,
    /// Samples quieter than this are treated as background noise
    pub amplitude_threshold: f32,
    /// How long the target note sounds
    pub note_duration_secs: f32,
    /// Quiet time after playback before listening resumes
    pub settle_secs: f32,
    /// Instruments a round may be played on
    pub instruments: Vec<String>,
    /// Number of finished rounds kept in the attempts history
    pub history_capacity: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            lowest_note: 40,
            highest_note: 76,
            amplitude_threshold: 0.2,
            note_duration_secs: 2.0,
            settle_secs: 1.0,
            instruments: vec!["Piano".to_string()],
            history_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl GameConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Arguments
    /// * `path` - Path of the JSON config file
    ///
    /// # Returns
    /// * `Ok(config)` - A playable configuration
    /// * `Err(e)` - The file could not be read, parsed or describes an unplayable game
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path)?;
        let config: GameConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the round engine relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instruments.is_empty() {
            return Err(ConfigError::Invalid("instrument list is empty".into()));
        }
        if self.highest_note > HIGHEST_NOTE {
            return Err(ConfigError::Invalid(format!(
                "highest_note {} is above {}",
                self.highest_note, HIGHEST_NOTE
            )));
        }
        if self.lowest_note > self.highest_note {
            return Err(ConfigError::Invalid(format!(
                "lowest_note {} is above highest_note {}",
                self.lowest_note, self.highest_note
            )));
        }
        if !(self.note_duration_secs > 0.0) || !playable(self.note_duration_secs) {
            return Err(ConfigError::Invalid(format!(
                "note_duration_secs must be positive and at most {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if !playable(self.settle_secs) {
            return Err(ConfigError::Invalid(format!(
                "settle_secs must be between 0 and {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if !self.amplitude_threshold.is_finite() {
            return Err(ConfigError::Invalid("amplitude_threshold must be finite".into()));
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Invalid("history_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// The inclusive range of notes targets are drawn from.
    ///
    /// Only meaningful on a validated config.
    pub fn note_range(&self) -> (Note, Note) {
        let low = Note::new(self.lowest_note).unwrap_or(Note::MIDDLE_C);
        let high = Note::new(self.highest_note).unwrap_or(Note::MIDDLE_C);
        (low, high)
    }

    pub fn note_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.note_duration_secs).unwrap_or_default()
    }

    pub fn settle_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.settle_secs).unwrap_or_default()
    }
}

/// Whether `secs` is a non-negative duration the audio side can render.
fn playable(secs: f32) -> bool {
    (0.0..=MAX_DURATION_SECS).contains(&secs) && Duration::try_from_secs_f32(secs).is_ok()
}
