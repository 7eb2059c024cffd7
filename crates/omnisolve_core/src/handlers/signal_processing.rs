use crate::traits::Handler;
use anyhow::{bail, Result};
use num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumSettings {
    /// Number of dominant peaks to report.
    pub top_k: usize,
    /// Subtract the mean before transforming.
    pub detrend: bool,
}

impl Default for SpectrumSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            detrend: false,
        }
    }
}

fn default_sample_rate() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalInput {
    pub signal: Vec<f64>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default)]
    pub settings: SpectrumSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spectrum {
    /// Bin centres in Hz for bins `0..=n/2`.
    pub frequencies: Vec<f64>,
    /// Single-sided amplitude per bin.
    pub magnitudes: Vec<f64>,
    /// Strongest non-DC local peaks, largest first.
    pub dominant_frequencies: Vec<f64>,
}

/// Real-signal magnitude spectrum via a forward FFT.
pub struct SignalProcessing;

impl Handler for SignalProcessing {
    const LABEL: &'static str = "signal_processing";
    const PARAMETERS: &'static [&'static str] = &["signal", "sample_rate", "settings"];

    type Input = SignalInput;
    type Output = Spectrum;

    fn run(&self, input: SignalInput) -> Result<Spectrum> {
        let n = input.signal.len();
        if n < 2 {
            bail!("signal must have at least 2 samples, got {}.", n);
        }
        if !(input.sample_rate.is_finite() && input.sample_rate > 0.0) {
            bail!("sample_rate must be positive, got {}.", input.sample_rate);
        }
        if input.signal.iter().any(|v| !v.is_finite()) {
            bail!("signal contains non-finite samples.");
        }

        let offset = if input.settings.detrend {
            input.signal.iter().sum::<f64>() / n as f64
        } else {
            0.0
        };
        let mut buffer: Vec<Complex<f64>> = input
            .signal
            .iter()
            .map(|&v| Complex::new(v - offset, 0.0))
            .collect();
        FftPlanner::<f64>::new()
            .plan_fft_forward(n)
            .process(&mut buffer);

        let half = n / 2;
        let bin_width = input.sample_rate / n as f64;
        let frequencies: Vec<f64> = (0..=half).map(|k| k as f64 * bin_width).collect();
        let magnitudes: Vec<f64> = buffer[..=half]
            .iter()
            .enumerate()
            .map(|(k, c)| {
                // Interior bins carry the energy of their mirrored twin.
                let mirrored = k != 0 && !(n % 2 == 0 && k == half);
                c.norm() / n as f64 * if mirrored { 2.0 } else { 1.0 }
            })
            .collect();

        // Bins below this are rounding noise.
        let floor = magnitudes.iter().copied().fold(0.0, f64::max) * 1e-9;
        let mut peaks: Vec<usize> = (1..=half)
            .filter(|&k| {
                let left = magnitudes[k - 1];
                let right = magnitudes.get(k + 1).copied().unwrap_or(0.0);
                magnitudes[k] > floor && magnitudes[k] >= left && magnitudes[k] >= right
            })
            .collect();
        peaks.sort_by(|&a, &b| magnitudes[b].total_cmp(&magnitudes[a]).then(a.cmp(&b)));
        peaks.truncate(input.settings.top_k);
        debug!(samples = n, peaks = peaks.len(), "spectrum computed");

        Ok(Spectrum {
            dominant_frequencies: peaks.iter().map(|&k| frequencies[k]).collect(),
            frequencies,
            magnitudes,
        })
    }
}
