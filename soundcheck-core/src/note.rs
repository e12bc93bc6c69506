//! # Note Classification Module
//!
//! This module converts detected frequencies into MIDI note numbers and note
//! numbers into the names shown to the player.
//!
//! ## Features
//! - Octave folding against a single reference octave (C0 to B0)
//! - Nearest-neighbour pitch class matching
//! - Sharp-based note naming (`C♯4`, `A♯2`, ...)
//! - Note name to note number lookups
//! - Equal temperament frequencies for playback

use once_cell::sync::Lazy;
use std::collections::BTreeMap;
use std::fmt;

/// Frequencies of the twelve pitch classes in the lowest octave, C0 to B0.
pub const REFERENCE_FREQUENCIES: [f32; 12] = [
    16.35, 17.32, 18.35, 19.45, 20.6, 21.83, 23.12, 24.5, 25.96, 27.5, 29.14, 30.87,
];

/// Display names of the twelve pitch classes, black keys written as sharps.
pub const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C♯", "D", "D♯", "E", "F", "F♯", "G", "G♯", "A", "A♯", "B",
];

/// Highest representable MIDI note number.
pub const HIGHEST_NOTE: u8 = 127;

/// A MIDI note number in `0..=127`. Middle C is 60.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Note(u8);

/// The display form of a note: pitch class plus octave number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NoteName {
    pub pitch_class: &'static str,
    pub octave: i8,
}

/// Lookup table from display names to notes.
///
/// Both the `♯` glyph and an ASCII `#` are accepted for black keys, so
/// "C♯4" and "C#4" resolve to the same note.
static NOTE_MAP: Lazy<BTreeMap<String, Note>> = Lazy::new(|| {
    let mut map = BTreeMap::new();
    for number in 0..=HIGHEST_NOTE {
        let note = Note(number);
        let name = note.name();
        map.insert(name.to_string(), note);
        if let Some(natural) = name.pitch_class.strip_suffix('♯') {
            map.insert(format!("{}#{}", natural, name.octave), note);
        }
    }
    map
});

impl Note {
    pub const MIDDLE_C: Note = Note(60);

    /// Creates a note, returning `None` above [`HIGHEST_NOTE`].
    pub fn new(number: u8) -> Option<Note> {
        (number <= HIGHEST_NOTE).then_some(Note(number))
    }

    pub fn number(self) -> u8 {
        self.0
    }

    /// Returns the pitch class and octave of this note.
    ///
    /// The octave is `floor(number / 12) - 1`, so note 0 is C-1 and note 60
    /// is C4.
    pub fn name(self) -> NoteName {
        NoteName {
            pitch_class: PITCH_CLASS_NAMES[(self.0 % 12) as usize],
            octave: (self.0 / 12) as i8 - 1,
        }
    }

    /// Equal temperament frequency of this note with A4 = 440 Hz.
    pub fn frequency(self) -> f32 {
        440.0 * 2.0_f32.powf((self.0 as f32 - 69.0) / 12.0)
    }

    /// Looks up a note by its display name (e.g. "A4", "C♯3" or "C#3").
    pub fn from_name(name: &str) -> Option<Note> {
        NOTE_MAP.get(name).copied()
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl NoteName {
    /// Inverse of [`Note::name`].
    ///
    /// Returns `None` for an unknown pitch class or a name outside the MIDI
    /// range.
    pub fn to_note(&self) -> Option<Note> {
        let class = PITCH_CLASS_NAMES
            .iter()
            .position(|&c| c == self.pitch_class)? as i32;
        let number = (self.octave as i32 + 1) * 12 + class;
        u8::try_from(number).ok().and_then(Note::new)
    }
}

impl fmt::Display for NoteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.pitch_class, self.octave)
    }
}

/// Classifies a frequency as the nearest MIDI note.
///
/// The frequency is folded into the reference octave `[C0, C1)` by halving or
/// doubling it, counting each step as one octave. The folded value is then
/// matched against the reference table plus C1 (twice the first entry),
/// which stands for pitch class C of the next octave. Without that extra
/// candidate, frequencies just below a C would fall between B0 and C1 and be
/// classified as the B below.
///
/// Matching uses the absolute frequency difference. The first minimal entry
/// wins ties.
///
/// # Arguments
/// * `frequency` - Detected fundamental frequency in Hz
///
/// # Returns
/// * `Some(note)` - Nearest note, clamped to `0..=127`
/// * `None` - The input was zero, negative, NaN or infinite
pub fn frequency_to_note(frequency: f32) -> Option<Note> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return None;
    }

    let lowest = REFERENCE_FREQUENCIES[0];
    let ceiling = 2.0 * lowest;

    // Both loops test against the same half-open interval, so a value
    // exactly on an octave boundary never bounces between them.
    let mut folded = frequency;
    let mut octave: i32 = 0;
    while folded >= ceiling {
        folded /= 2.0;
        octave += 1;
    }
    while folded < lowest {
        folded *= 2.0;
        octave -= 1;
    }

    let index = nearest_pitch_class(folded, ceiling);
    let number = (octave + 1) * 12 + index as i32;
    Some(Note(number.clamp(0, HIGHEST_NOTE as i32) as u8))
}

/// Returns the index (0..=12) of the candidate nearest to `folded`, where 12
/// is the C of the next octave.
fn nearest_pitch_class(folded: f32, ceiling: f32) -> usize {
    let mut min_distance = f32::INFINITY;
    let mut index = 0;

    for (candidate, &reference) in REFERENCE_FREQUENCIES
        .iter()
        .chain(std::iter::once(&ceiling))
        .enumerate()
    {
        let distance = (reference - folded).abs();
        if distance < min_distance {
            index = candidate;
            min_distance = distance;
        }
    }
    index
}
