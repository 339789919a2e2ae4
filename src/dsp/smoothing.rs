use std::collections::{BTreeMap, BTreeSet};

use log::debug;

/// Bins in the frequency-axis box filter applied to displayed FFT curves.
pub const FFT_DISPLAY_BOX: usize = 5;
/// Weight kept by the band-axis ceiling when the observed peak is lower.
pub const CEILING_DECAY: f64 = 0.995;

pub fn smoothing_window_samples(window_ms: f64, sample_rate_hz: f64) -> usize {
    ((window_ms / 1000.0 * sample_rate_hz).round().max(0.0) as usize).max(1)
}

/// Centered moving average with nearest-edge extension.
///
/// NaN samples are left out of every average and stay NaN in the output. Input that is
/// entirely NaN, empty or smoothed with `window <= 1` comes back unchanged.
pub fn moving_average(data: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || data.iter().all(|v| v.is_nan()) {
        return data.to_vec();
    }
    let n = data.len();
    let left = window / 2;
    let extended_len = n + window - 1;
    // Prefix sums over the edge-extended sequence.
    let mut sums = Vec::with_capacity(extended_len + 1);
    let mut counts = Vec::with_capacity(extended_len + 1);
    sums.push(0.0);
    counts.push(0usize);
    for j in 0..extended_len {
        let v = data[j.saturating_sub(left).min(n - 1)];
        let (s, c) = (sums[j], counts[j]);
        if v.is_nan() {
            sums.push(s);
            counts.push(c);
        } else {
            sums.push(s + v);
            counts.push(c + 1);
        }
    }
    data.iter()
        .enumerate()
        .map(|(i, &v)| {
            if v.is_nan() {
                return f64::NAN;
            }
            let count = counts[i + window] - counts[i];
            (sums[i + window] - sums[i]) / count as f64
        })
        .collect()
}

/// Display smoothing of a time-domain trace; identity when disabled.
pub fn smooth_display(
    data: &[f64],
    enabled: bool,
    window_ms: f64,
    sample_rate_hz: f64,
) -> Vec<f64> {
    if !enabled {
        return data.to_vec();
    }
    moving_average(data, smoothing_window_samples(window_ms, sample_rate_hz))
}

fn ema(alpha: f64, value: f64, previous: f64) -> f64 {
    alpha * value + (1.0 - alpha) * previous
}

/// Running maximum that rises instantly and decays slowly toward lower observations.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AxisCeiling {
    value: f64,
}

impl AxisCeiling {
    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn observe(&mut self, observed: f64) -> f64 {
        if observed > self.value {
            self.value = observed;
        } else {
            self.value = CEILING_DECAY * self.value + (1.0 - CEILING_DECAY) * observed;
        }
        self.value
    }

    pub fn reset(&mut self) {
        self.value = 0.0;
    }
}

/// EMA caches for spectral displays: one FFT vector per channel plus the band values.
#[derive(Clone, Debug)]
pub struct SpectralSmoother {
    fft_alpha: f64,
    band_alpha: f64,
    fft: BTreeMap<usize, Vec<f64>>,
    bands: Vec<f64>,
    ceiling: AxisCeiling,
}

impl SpectralSmoother {
    pub fn new(fft_alpha: f64, band_alpha: f64) -> Self {
        Self {
            fft_alpha,
            band_alpha,
            fft: BTreeMap::new(),
            bands: Vec::new(),
            ceiling: AxisCeiling::default(),
        }
    }

    /// Fold a fresh power vector into the channel's EMA and return the display curve.
    ///
    /// A cached vector of a different length is discarded and reseeded from `fresh`.
    pub fn smooth_fft(&mut self, channel: usize, fresh: &[f64]) -> Vec<f64> {
        let alpha = self.fft_alpha;
        let smoothed = match self.fft.get_mut(&channel) {
            Some(cached) if cached.len() == fresh.len() => {
                for (old, &new) in cached.iter_mut().zip(fresh) {
                    *old = ema(alpha, new, *old);
                }
                cached.clone()
            }
            Some(_) => {
                debug!("fft bin count changed on channel {channel}; reseeding average");
                fresh.to_vec()
            }
            None => fresh.to_vec(),
        };
        self.fft.insert(channel, smoothed.clone());
        moving_average(&smoothed, FFT_DISPLAY_BOX)
    }

    pub fn cached_fft(&self, channel: usize) -> Option<&[f64]> {
        self.fft.get(&channel).map(Vec::as_slice)
    }

    pub fn cached_bands(&self) -> &[f64] {
        &self.bands
    }

    pub fn smooth_bands(&mut self, fresh: &[f64]) -> Vec<f64> {
        if self.bands.len() == fresh.len() {
            for (old, &new) in self.bands.iter_mut().zip(fresh) {
                *old = ema(self.band_alpha, new, *old);
            }
        } else {
            self.bands = fresh.to_vec();
        }
        self.bands.clone()
    }

    /// Track the axis ceiling for the current smoothed band values.
    pub fn observe_band_peak(&mut self, smoothed: &[f64]) -> f64 {
        let peak = if smoothed.is_empty() {
            1.0
        } else {
            smoothed.iter().copied().fold(f64::MIN, f64::max)
        };
        self.ceiling.observe(peak)
    }

    pub fn band_ceiling(&self) -> f64 {
        self.ceiling.value()
    }

    pub fn retain_channels(&mut self, active: &BTreeSet<usize>) {
        self.fft.retain(|ch, _| active.contains(ch));
    }

    pub fn clear_fft(&mut self) {
        self.fft.clear();
    }

    pub fn clear(&mut self) {
        self.fft.clear();
        self.bands.clear();
        self.ceiling.reset();
    }
}
