//! Spectral analysis of visualization snapshots

use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

/// Added to every magnitude before the log conversion so silence maps to a
/// finite floor instead of -inf.
const DB_EPSILON: f32 = 1e-9;

/// One renderable spectrum: paired frequency / dB-magnitude curves.
///
/// Both axes have length `n/2 + 1` for an `n`-sample snapshot and the
/// frequencies are strictly increasing. Recomputed per analysis tick,
/// never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpectrumFrame {
    pub frequencies: Vec<f32>,
    pub magnitudes_db: Vec<f32>,
}

/// Windowed real-input FFT over buffer snapshots.
///
/// Stateless across calls apart from the cached window: analyzing the same
/// snapshot twice yields bit-identical frames.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    window: Vec<f32>,
    window_rebuilds: u32,
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            window: Vec::new(),
            window_rebuilds: 0,
        }
    }

    /// Turn a buffer snapshot into a spectrum.
    ///
    /// Applies a Hann window (recomputed only when the snapshot length
    /// changes), runs the forward FFT and converts the `n/2 + 1`
    /// non-redundant bins to dB. Bin `k` sits at `k * sample_rate / n` Hz.
    pub fn analyze(&mut self, snapshot: &[f32], sample_rate: u32) -> SpectrumFrame {
        let n = snapshot.len();
        if n == 0 {
            return SpectrumFrame::default();
        }

        if self.window.len() != n {
            self.window = hann_window(n);
            self.window_rebuilds += 1;
            log::debug!(
                "rebuilt {n}-point analysis window (rebuild #{})",
                self.window_rebuilds
            );
        }

        let mut buffer: Vec<Complex<f32>> = snapshot
            .iter()
            .zip(self.window.iter())
            .map(|(&s, &w)| Complex::new(s * w, 0.0))
            .collect();

        let fft = self.planner.plan_fft_forward(n);
        fft.process(&mut buffer);

        let bins = n / 2 + 1;
        let magnitudes_db: Vec<f32> = buffer[..bins]
            .iter()
            .map(|bin| 20.0 * (bin.norm() + DB_EPSILON).log10())
            .collect();
        let frequencies: Vec<f32> = (0..bins)
            .map(|k| k as f32 * sample_rate as f32 / n as f32)
            .collect();

        SpectrumFrame {
            frequencies,
            magnitudes_db,
        }
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn hann_window(len: usize) -> Vec<f32> {
    if len <= 1 {
        return vec![1.0; len];
    }
    (0..len)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos()
        })
        .collect()
}
