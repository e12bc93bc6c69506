//! # Playback Voice Module
//!
//! A small additive synthesizer that sounds one target note at a time and
//! reports when the note plus its settle tail has been rendered.

use std::time::Duration;

use crate::engine::{PlaybackRequest, PlaybackToken};
use crate::error::AudioError;

/// Output gain applied to every voice
const MASTER_GAIN: f32 = 0.3;

/// Timbres the voice can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instrument {
    /// Bright attack with a decaying set of harmonics
    Piano,
    /// A plain sine tone
    Sine,
}

/// Attack, exponential decay and release, all in seconds.
#[derive(Debug, Clone, Copy)]
struct Envelope {
    attack: f32,
    /// Amplitude halves every `half_life` seconds; zero disables decay
    half_life: f32,
    release: f32,
}

impl Envelope {
    /// Amplitude at `t` seconds into a note lasting `length` seconds.
    fn eval(&self, t: f32, length: f32) -> f32 {
        if t >= length {
            return 0.0;
        }
        let attack = if t < self.attack { t / self.attack } else { 1.0 };
        let decay = if self.half_life > 0.0 {
            0.5_f32.powf(t / self.half_life)
        } else {
            1.0
        };
        let remaining = length - t;
        let release = if remaining < self.release {
            remaining / self.release
        } else {
            1.0
        };
        attack * decay * release
    }
}

impl Instrument {
    /// Resolves a configured instrument name.
    pub fn from_name(name: &str) -> Result<Self, AudioError> {
        match name.to_ascii_lowercase().as_str() {
            "piano" => Ok(Instrument::Piano),
            "sine" => Ok(Instrument::Sine),
            _ => Err(AudioError::UnknownInstrument(name.to_string())),
        }
    }

    /// Relative amplitudes of the harmonics, fundamental first.
    fn partials(self) -> &'static [f32] {
        match self {
            Instrument::Piano => &[1.0, 0.5, 0.3, 0.15, 0.08, 0.04],
            Instrument::Sine => &[1.0],
        }
    }

    fn envelope(self) -> Envelope {
        match self {
            Instrument::Piano => Envelope {
                attack: 0.005,
                half_life: 0.6,
                release: 0.1,
            },
            Instrument::Sine => Envelope {
                attack: 0.02,
                half_life: 0.0,
                release: 0.05,
            },
        }
    }
}

#[derive(Debug)]
struct ScheduledNote {
    frequency: f32,
    token: PlaybackToken,
    /// Frames rendered so far
    position: u64,
    note_frames: u64,
    /// Note plus settle tail
    total_frames: u64,
}

/// The voice rendered by the output stream.
#[derive(Debug)]
pub struct Voice {
    sample_rate: u32,
    instrument: Instrument,
    note: Option<ScheduledNote>,
}

fn frames(duration: Duration, sample_rate: u32) -> u64 {
    (duration.as_secs_f64() * sample_rate as f64).round() as u64
}

impl Voice {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            instrument: Instrument::Piano,
            note: None,
        }
    }

    pub fn set_instrument(&mut self, instrument: Instrument) {
        self.instrument = instrument;
    }

    /// Starts `request`, replacing anything still sounding.
    pub fn start(&mut self, request: &PlaybackRequest) {
        if let Ok(instrument) = Instrument::from_name(&request.instrument) {
            self.instrument = instrument;
        }
        let note_frames = frames(request.duration, self.sample_rate);
        self.note = Some(ScheduledNote {
            frequency: request.note.frequency(),
            token: request.token,
            position: 0,
            note_frames,
            total_frames: note_frames + frames(request.settle, self.sample_rate),
        });
    }

    /// Silences the voice. The interrupted playback never completes.
    pub fn stop(&mut self) {
        self.note = None;
    }

    pub fn is_active(&self) -> bool {
        self.note.is_some()
    }

    /// Fills an interleaved output buffer.
    ///
    /// # Arguments
    /// * `output` - Interleaved buffer, overwritten
    /// * `channels` - Number of interleaved channels (at least 1)
    ///
    /// # Returns
    /// * `Some(token)` - The scheduled playback and its settle tail finished within this buffer
    /// * `None` - Still playing, or nothing scheduled
    pub fn render(&mut self, output: &mut [f32], channels: usize) -> Option<PlaybackToken> {
        let channels = channels.max(1);
        let mut finished = None;
        let sample_rate = self.sample_rate as f32;
        let envelope = self.instrument.envelope();
        let partials = self.instrument.partials();
        let norm: f32 = partials.iter().sum();

        for frame in output.chunks_mut(channels) {
            let value = match self.note.as_mut() {
                Some(note) => {
                    let t = note.position as f32 / sample_rate;
                    let length = note.note_frames as f32 / sample_rate;
                    let level = envelope.eval(t, length);
                    let value = if level > 0.0 {
                        let phase = 2.0 * std::f32::consts::PI * note.frequency * t;
                        let tone: f32 = partials
                            .iter()
                            .enumerate()
                            .map(|(i, weight)| weight * (phase * (i + 1) as f32).sin())
                            .sum();
                        MASTER_GAIN * level * tone / norm
                    } else {
                        0.0
                    };
                    note.position += 1;
                    if note.position >= note.total_frames {
                        finished = Some(note.token);
                    }
                    value
                }
                None => 0.0,
            };
            if finished.is_some() {
                self.note = None;
            }
            frame.fill(value);
        }
        finished
    }
}
