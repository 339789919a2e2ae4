use std::f64::consts::PI;

use rustfft::{num_complex::Complex64, FftPlanner};

/// Spectral displays stop here regardless of sampling rate or notch frequency.
pub const MAX_DISPLAY_HZ: f64 = 50.0;
/// Upper bound on the Welch segment length.
pub const WELCH_MAX_SEGMENT: usize = 256;
const POWER_FLOOR: f64 = 1e-10;

/// Named EEG frequency bands. Alpha and Mu overlap on purpose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Band {
    Delta,
    Theta,
    Alpha,
    Mu,
    Beta,
    Gamma,
}

impl Band {
    pub const ALL: [Band; 6] = [
        Band::Delta,
        Band::Theta,
        Band::Alpha,
        Band::Mu,
        Band::Beta,
        Band::Gamma,
    ];

    /// `[low, high)` in Hz.
    pub fn range_hz(self) -> (f64, f64) {
        match self {
            Band::Delta => (0.5, 4.0),
            Band::Theta => (4.0, 8.0),
            Band::Alpha => (8.0, 13.0),
            Band::Mu => (8.0, 12.0),
            Band::Beta => (13.0, 30.0),
            Band::Gamma => (30.0, 50.0),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Band::Delta => "Delta",
            Band::Theta => "Theta",
            Band::Alpha => "Alpha",
            Band::Mu => "Mu",
            Band::Beta => "Beta",
            Band::Gamma => "Gamma",
        }
    }
}

/// Windowed FFT power in dB, restricted to `<= MAX_DISPLAY_HZ`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PowerSpectrum {
    pub frequencies_hz: Vec<f64>,
    pub power_db: Vec<f64>,
}

/// One-sided power spectral density.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Psd {
    pub frequencies_hz: Vec<f64>,
    pub density: Vec<f64>,
}

impl Psd {
    /// Mean density over bins in `[low, high)`; `None` when no bin falls inside.
    pub fn band_mean(&self, band: Band) -> Option<f64> {
        let (low, high) = band.range_hz();
        let (sum, count) = self
            .frequencies_hz
            .iter()
            .zip(&self.density)
            .filter(|(f, _)| **f >= low && **f < high)
            .fold((0.0, 0usize), |(s, c), (_, p)| (s + p, c + 1));
        (count > 0).then(|| sum / count as f64)
    }
}

/// Symmetric Hann window (both ends zero).
fn hann_symmetric(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = n.saturating_sub(1) as f64;
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}

/// Periodic Hann window, the spectral-analysis variant.
fn hann_periodic(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / n as f64).cos())
        .collect()
}

fn nan_to_zero(samples: &[f64]) -> Vec<f64> {
    samples
        .iter()
        .map(|v| if v.is_nan() { 0.0 } else { *v })
        .collect()
}

/// FFT front-end shared by the power-spectrum and band-power paths.
///
/// Keeps one planner so repeated frames of the same length reuse their plans.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
        }
    }

    /// One-sided spectrum (bins `0..=n/2`) of real input.
    fn rfft(&mut self, input: &[f64]) -> Vec<Complex64> {
        let n = input.len();
        let fft = self.planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex64> = input.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        fft.process(&mut buffer);
        buffer.truncate(n / 2 + 1);
        buffer
    }

    pub fn power_spectrum(&mut self, samples: &[f64], sample_rate_hz: f64) -> PowerSpectrum {
        let n = samples.len();
        if n == 0 || sample_rate_hz <= 0.0 {
            return PowerSpectrum::default();
        }
        let window = hann_symmetric(n);
        let window_sum: f64 = window.iter().sum();
        let norm = if window_sum > 0.0 { 2.0 / window_sum } else { 0.0 };
        let windowed: Vec<f64> = nan_to_zero(samples)
            .iter()
            .zip(&window)
            .map(|(x, w)| x * w)
            .collect();

        let mut spectrum = PowerSpectrum::default();
        for (k, bin) in self.rfft(&windowed).iter().enumerate() {
            let freq = k as f64 * sample_rate_hz / n as f64;
            if freq > MAX_DISPLAY_HZ {
                break;
            }
            spectrum.frequencies_hz.push(freq);
            spectrum
                .power_db
                .push(20.0 * (bin.norm() * norm + POWER_FLOOR).log10());
        }
        spectrum
    }

    /// Welch PSD: periodic Hann segments with 50 % overlap, per-segment mean removal,
    /// density scaling.
    pub fn welch_psd(&mut self, samples: &[f64], sample_rate_hz: f64, segment_len: usize) -> Psd {
        let len = samples.len();
        let nperseg = segment_len.min(len);
        if nperseg == 0 || sample_rate_hz <= 0.0 {
            return Psd::default();
        }
        let data = nan_to_zero(samples);
        let overlap = nperseg / 2;
        let step = nperseg - overlap;
        let segments = (len - overlap) / step;
        let window = hann_periodic(nperseg);
        let scale = 1.0 / (sample_rate_hz * window.iter().map(|w| w * w).sum::<f64>());
        let bins = nperseg / 2 + 1;

        let mut density = vec![0.0; bins];
        for seg in 0..segments {
            let chunk = &data[seg * step..seg * step + nperseg];
            let mean = chunk.iter().sum::<f64>() / nperseg as f64;
            let windowed: Vec<f64> = chunk
                .iter()
                .zip(&window)
                .map(|(x, w)| (x - mean) * w)
                .collect();
            for (acc, bin) in density.iter_mut().zip(self.rfft(&windowed)) {
                *acc += bin.norm_sqr() * scale;
            }
        }
        let nyquist_bin = (nperseg % 2 == 0).then_some(bins - 1);
        for (k, value) in density.iter_mut().enumerate() {
            *value /= segments as f64;
            if k != 0 && Some(k) != nyquist_bin {
                *value *= 2.0;
            }
        }
        Psd {
            frequencies_hz: (0..bins)
                .map(|k| k as f64 * sample_rate_hz / nperseg as f64)
                .collect(),
            density,
        }
    }

    /// Mean Welch band power across `channels`, in [`Band::ALL`] order.
    pub fn band_powers<'a>(
        &mut self,
        channels: impl IntoIterator<Item = &'a [f64]>,
        sample_rate_hz: f64,
    ) -> [f64; 6] {
        let mut totals = [0.0; 6];
        let mut count = 0usize;
        for samples in channels {
            count += 1;
            let psd = self.welch_psd(samples, sample_rate_hz, WELCH_MAX_SEGMENT.min(samples.len()));
            for (total, band) in totals.iter_mut().zip(Band::ALL) {
                *total += psd.band_mean(band).unwrap_or(0.0);
            }
        }
        if count > 0 {
            for total in &mut totals {
                *total /= count as f64;
            }
        }
        totals
    }
}
