//! # Fast Fourier Transform (FFT) Module
//!
//! Magnitude spectra of microphone frames, used to refine the time-domain
//! pitch estimate. The FFT plan and the Hann window are computed once per
//! frame size and reused for every frame.

use rustfft::{Fft, FftPlanner, num_complex::Complex};
use std::sync::Arc;

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

fn hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let n_minus_1 = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos()))
        .collect()
}

/// Computes windowed magnitude spectra for frames of a fixed size.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(frame_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(frame_size);
        Self {
            fft,
            window: hann_window(frame_size),
            buffer: vec![Complex { re: 0.0, im: 0.0 }; frame_size],
        }
    }

    pub fn frame_size(&self) -> usize {
        self.window.len()
    }

    /// Returns the magnitude spectrum up to the Nyquist frequency.
    ///
    /// The frame is DC-corrected and Hann-windowed first. Frames of the
    /// wrong size yield `None`.
    ///
    /// # Arguments
    /// * `signal` - Audio frame, exactly `frame_size` samples
    ///
    /// # Returns
    /// * `Some(magnitudes)` - `frame_size / 2` magnitudes; bin `k` sits at
    ///   `k * sample_rate / frame_size` Hz
    /// * `None` - The frame has the wrong length
    pub fn magnitudes(&mut self, signal: &[f32]) -> Option<Vec<f32>> {
        if signal.len() != self.frame_size() {
            return None;
        }

        let mut processed_signal = signal.to_vec();
        remove_dc_offset(&mut processed_signal);

        for ((slot, sample), weight) in self
            .buffer
            .iter_mut()
            .zip(processed_signal)
            .zip(&self.window)
        {
            *slot = Complex {
                re: sample * weight,
                im: 0.0,
            };
        }

        self.fft.process(&mut self.buffer);

        Some(
            self.buffer
                .iter()
                .take(self.frame_size() / 2)
                .map(|c| c.norm()) // .norm() is sqrt(re^2 + im^2)
                .collect(),
        )
    }
}
