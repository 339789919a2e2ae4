use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Width of the IQR fence. Deliberately wide so legitimate large swings aren't clipped.
pub const IQR_FENCE: f64 = 5.0;

/// Bound used when no channel is selected.
pub const DEFAULT_BOUNDS: (f64, f64) = (0.0, 1.0);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundsMode {
    #[default]
    Iqr,
    MinMax,
}

/// Vertical bounds of one channel over the whole recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChannelBounds {
    pub iqr: (f64, f64),
    pub minmax: (f64, f64),
}

impl ChannelBounds {
    pub fn get(&self, mode: BoundsMode) -> (f64, f64) {
        match mode {
            BoundsMode::Iqr => self.iqr,
            BoundsMode::MinMax => self.minmax,
        }
    }
}

/// Quantile with linear interpolation between order statistics. `sorted` must be sorted.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

fn bounds_for_channel(channel: ArrayView1<'_, f64>) -> ChannelBounds {
    let mut sorted: Vec<f64> = channel.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return ChannelBounds {
            iqr: (0.0, 0.0),
            minmax: (0.0, 0.0),
        };
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);
    let iqr = q3 - q1;
    ChannelBounds {
        iqr: (q1 - iqr * IQR_FENCE, q3 + iqr * IQR_FENCE),
        minmax: (sorted[0], sorted[sorted.len() - 1]),
    }
}

/// Both bound variants for every channel. O(channels × samples log samples); call once
/// per file load or sample-rate change, never per frame.
pub fn compute_channel_bounds(data: &Array2<f64>) -> Vec<ChannelBounds> {
    data.rows().into_iter().map(bounds_for_channel).collect()
}

/// Bounds of the requested channel with the widest range, so every active channel fits.
pub fn select_bounds(
    bounds: &[ChannelBounds],
    channels: impl IntoIterator<Item = usize>,
    mode: BoundsMode,
) -> (f64, f64) {
    let mut first = None;
    let mut best: Option<((f64, f64), f64)> = None;
    for idx in channels {
        let Some(channel) = bounds.get(idx) else {
            continue;
        };
        let pair = channel.get(mode);
        first.get_or_insert(pair);
        let range = pair.1 - pair.0;
        if range > best.map_or(0.0, |(_, r)| r) {
            best = Some((pair, range));
        }
    }
    best.map(|(pair, _)| pair)
        .or(first)
        .unwrap_or(DEFAULT_BOUNDS)
}
