//! # Pitch Detection Module
//!
//! Turns microphone frames into [`PitchSample`]s for the round engine.
//! The fundamental is found with the YIN algorithm and then refined
//! against the frame's magnitude spectrum.
//!
//! ## Features
//! - YIN pitch detection that settles on the first clear dip, so a lower
//!   octave never wins
//! - Clarity checking to reject noise
//! - Parabolic interpolation for sub-sample accuracy, in both the lag and
//!   the frequency domain

use crate::PitchSample;
use crate::fft::SpectrumAnalyzer;

/// Frames with an RMS level below this are not analysed at all.
///
/// This only skips work on silence. The game's own noise gate sits in the
/// round engine.
pub const SILENCE_FLOOR: f32 = 0.01;

/// Lowest frequency reported, roughly the bottom of human hearing.
const MIN_FREQUENCY: f32 = 20.0;

/// Dips within this much of the deepest one count as candidates.
const DIP_MARGIN: f32 = 0.05;

/// A clear tone has a normalised difference at most this deep at its period.
const CLARITY_THRESHOLD: f32 = 0.1;

/// How far, in bins, the spectral peak may sit from the YIN estimate.
const SEARCH_BINS: f32 = 2.0;

/// Runs the full analysis on microphone frames of a fixed size.
pub struct PitchAnalyzer {
    sample_rate: u32,
    spectrum: SpectrumAnalyzer,
    /// Cumulative mean normalised difference per lag, reused across frames
    yin: Vec<f32>,
}

impl PitchAnalyzer {
    pub fn new(frame_size: usize, sample_rate: u32) -> Self {
        Self {
            sample_rate,
            spectrum: SpectrumAnalyzer::new(frame_size),
            yin: vec![0.0; frame_size / 2],
        }
    }

    /// Estimates the pitch and level of one frame.
    ///
    /// # Returns
    /// * `Some(sample)` - The frame holds a clear pitched sound
    /// * `None` - Silence, noise, or a frame of the wrong size
    pub fn analyze(&mut self, frame: &[f32]) -> Option<PitchSample> {
        if frame.len() != self.spectrum.frame_size() {
            return None;
        }
        let rough = self.fundamental(frame)?;
        let frequency = self
            .spectrum
            .magnitudes(frame)
            .and_then(|magnitudes| spectral_peak(&magnitudes, rough, self.sample_rate))
            .unwrap_or(rough);
        let amplitude = frame.iter().fold(0.0_f32, |peak, &s| peak.max(s.abs()));

        Some(PitchSample {
            frequency,
            amplitude,
        })
    }

    /// YIN estimate of the fundamental of `frame`, in Hz.
    fn fundamental(&mut self, frame: &[f32]) -> Option<f32> {
        let lags = frame.len() / 2;
        if lags < 3 {
            return None;
        }
        let rms = (frame.iter().map(|&s| s * s).sum::<f32>() / frame.len() as f32).sqrt();
        if rms < SILENCE_FLOOR {
            return None;
        }

        self.yin.resize(lags, 0.0);
        normalized_difference(frame, &mut self.yin);
        let period = first_clear_dip(&self.yin)?;

        let dip = &self.yin[period - 1..=period + 1];
        let offset = parabolic_vertex(dip[0], dip[1], dip[2]).unwrap_or(0.0);
        let frequency = self.sample_rate as f32 / (period as f32 + offset);
        (frequency.is_finite() && frequency > MIN_FREQUENCY).then_some(frequency)
    }
}

/// Fills `yin` with the cumulative mean normalised difference of `frame`.
///
/// `frame` must hold at least `2 * yin.len()` samples.
fn normalized_difference(frame: &[f32], yin: &mut [f32]) {
    let lags = yin.len();
    let head = &frame[..lags];
    yin[0] = 1.0;

    let mut running_sum = 0.0;
    for tau in 1..lags {
        let diff: f32 = head
            .iter()
            .zip(&frame[tau..tau + lags])
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        running_sum += diff;
        yin[tau] = if running_sum != 0.0 {
            diff * tau as f32 / running_sum
        } else {
            1.0
        };
    }
}

/// Lag of the first falling dip close to the global minimum, walked down to
/// its bottom. `None` unless the dip is clear and has a right neighbour.
fn first_clear_dip(yin: &[f32]) -> Option<usize> {
    let deepest = yin[1..].iter().copied().fold(f32::INFINITY, f32::min);
    let threshold = deepest + DIP_MARGIN;

    let mut period = (2..yin.len()).find(|&tau| yin[tau] < threshold && yin[tau] < yin[tau - 1])?;
    while period + 1 < yin.len() && yin[period + 1] < yin[period] {
        period += 1;
    }
    (period + 1 < yin.len() && yin[period] <= CLARITY_THRESHOLD).then_some(period)
}

/// Offset of the vertex of the parabola through three equally spaced points,
/// relative to the middle one. `None` when the points are collinear.
fn parabolic_vertex(left: f32, centre: f32, right: f32) -> Option<f32> {
    let curvature = left - 2.0 * centre + right;
    if curvature.abs() < 1e-6 {
        return None;
    }
    Some((left - right) / (2.0 * curvature))
}

/// Frequency of the strongest spectral peak near `rough`, interpolated on a
/// log scale. `None` when the spectrum gives no better answer.
fn spectral_peak(magnitudes: &[f32], rough: f32, sample_rate: u32) -> Option<f32> {
    if rough <= 0.0 || magnitudes.len() < 3 {
        return None;
    }
    let hz_per_bin = sample_rate as f32 / (magnitudes.len() * 2) as f32;
    let centre = rough / hz_per_bin;
    let low = (centre - SEARCH_BINS).max(1.0) as usize;
    let high = ((centre + SEARCH_BINS) as usize).min(magnitudes.len() - 2);
    if low > high {
        return None;
    }

    let peak = (low..=high).max_by(|&a, &b| magnitudes[a].total_cmp(&magnitudes[b]))?;
    let [left, top, right] = [peak - 1, peak, peak + 1].map(|bin| magnitudes[bin].ln());
    if !(left.is_finite() && top.is_finite() && right.is_finite()) {
        return None;
    }

    let frequency = (peak as f32 + parabolic_vertex(left, top, right)?) * hz_per_bin;
    (frequency.is_finite() && frequency > 0.0).then_some(frequency)
}
