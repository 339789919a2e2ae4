use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::dsp::fft::Band;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    /// One lane per channel, mean-centred and offset downwards.
    #[default]
    Stacked,
    /// Every channel drawn on the same axis as-is.
    Overlay,
}

/// Lane height for `channel_count` stacked channels.
pub fn channel_spacing(total_y_span: f64, channel_count: usize) -> f64 {
    total_y_span / (channel_count + 1) as f64
}

fn nan_mean(samples: &[f64]) -> Option<f64> {
    let (sum, count) = samples
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Layout parameters for time-domain traces.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraceLayout {
    pub mode: DisplayMode,
    pub total_y_span: f64,
    pub amplitude_scale: f64,
}

impl TraceLayout {
    /// Vertical offset of the `lane`-th displayed channel.
    pub fn offset(&self, lane: usize, channel_count: usize) -> f64 {
        match self.mode {
            DisplayMode::Stacked => {
                -(lane as f64) * channel_spacing(self.total_y_span, channel_count)
            }
            DisplayMode::Overlay => 0.0,
        }
    }

    /// Place one channel's samples in its lane. NaN stays NaN.
    pub fn place(&self, samples: &[f64], lane: usize, channel_count: usize) -> Vec<f64> {
        match self.mode {
            DisplayMode::Overlay => samples.to_vec(),
            DisplayMode::Stacked => {
                let mean = nan_mean(samples).unwrap_or(0.0);
                let offset = self.offset(lane, channel_count);
                samples
                    .iter()
                    .map(|v| (v - mean) * self.amplitude_scale + offset)
                    .collect()
            }
        }
    }

    /// One full lane of headroom above the first channel and below the last.
    pub fn stacked_y_range(&self, channel_count: usize) -> (f64, f64) {
        let spacing = channel_spacing(self.total_y_span, channel_count);
        (-(channel_count as f64) * spacing, spacing)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelTrace {
    pub index: usize,
    pub name: String,
    pub samples: Vec<f64>,
    pub offset: f64,
}

/// Everything a renderer needs to draw one waveform refresh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaveformFrame {
    pub time_axis: Vec<f64>,
    pub channels: Vec<ChannelTrace>,
    pub y_range: (f64, f64),
}

impl WaveformFrame {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() || self.time_axis.is_empty()
    }
}

/// Build a frame from `(index, name, samples)` triples sharing one time axis.
pub fn build_waveform_frame<'a>(
    time_axis: Vec<f64>,
    channels: impl IntoIterator<Item = (usize, &'a str, ArrayView1<'a, f64>)>,
    layout: &TraceLayout,
    overlay_range: (f64, f64),
    smooth: impl Fn(&[f64]) -> Vec<f64>,
) -> WaveformFrame {
    let channels: Vec<_> = channels.into_iter().collect();
    let count = channels.len();
    let traces = channels
        .into_iter()
        .enumerate()
        .map(|(lane, (index, name, samples))| {
            let smoothed = smooth(&samples.to_vec());
            ChannelTrace {
                index,
                name: name.to_owned(),
                samples: layout.place(&smoothed, lane, count),
                offset: layout.offset(lane, count),
            }
        })
        .collect();
    let y_range = match layout.mode {
        DisplayMode::Stacked => layout.stacked_y_range(count),
        DisplayMode::Overlay => overlay_range,
    };
    WaveformFrame {
        time_axis,
        channels: traces,
        y_range,
    }
}

/// Smoothed FFT curves of the active channels on a shared frequency axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpectrumFrame {
    pub frequencies_hz: Vec<f64>,
    pub channels: Vec<(usize, Vec<f64>)>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BandPowerFrame {
    pub bands: Vec<(Band, f64)>,
    pub axis_ceiling: f64,
}

impl BandPowerFrame {
    pub fn value(&self, band: Band) -> Option<f64> {
        self.bands.iter().find(|(b, _)| *b == band).map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn stacked() -> TraceLayout {
        TraceLayout {
            mode: DisplayMode::Stacked,
            total_y_span: 1600.0,
            amplitude_scale: 1.0,
        }
    }

    #[test]
    fn spacing_divides_span_by_lanes_plus_one() {
        assert_eq!(channel_spacing(1600.0, 3), 400.0);
        assert_eq!(channel_spacing(1600.0, 0), 1600.0);
    }

    #[test]
    fn stacked_lane_is_mean_centred_and_offset() {
        let layout = stacked();
        let placed = layout.place(&[1.0, 3.0, f64::NAN, 5.0], 1, 3);
        assert_eq!(placed[0], -2.0 - 400.0);
        assert_eq!(placed[1], -400.0);
        assert!(placed[2].is_nan());
        assert_eq!(placed[3], 2.0 - 400.0);
    }

    #[test]
    fn overlay_passes_samples_through() {
        let layout = TraceLayout {
            mode: DisplayMode::Overlay,
            ..stacked()
        };
        assert_eq!(layout.place(&[7.0, 8.0], 4, 8), vec![7.0, 8.0]);
        assert_eq!(layout.offset(4, 8), 0.0);
    }

    #[test]
    fn frame_assigns_lanes_in_order() {
        let data = array![[1.0, 1.0], [2.0, 4.0]];
        let frame = build_waveform_frame(
            vec![0.0, 0.5],
            [(0, "Ch1", data.row(0)), (1, "Ch2", data.row(1))],
            &stacked(),
            (0.0, 1.0),
            |s| s.to_vec(),
        );
        assert_eq!(frame.channels.len(), 2);
        assert_eq!(frame.channels[1].name, "Ch2");
        assert!((frame.channels[1].offset + 1600.0 / 3.0).abs() < 1e-9);
        assert_eq!(frame.channels[0].samples, vec![0.0, 0.0]);
        let (low, high) = frame.y_range;
        assert!(low < frame.channels[1].offset && high > 0.0);
    }

    #[test]
    fn overlay_frame_uses_supplied_range() {
        let data = array![[1.0, 2.0]];
        let layout = TraceLayout {
            mode: DisplayMode::Overlay,
            ..stacked()
        };
        let frame = build_waveform_frame(
            vec![0.0, 1.0],
            [(0, "Ch1", data.row(0))],
            &layout,
            (-5.0, 5.0),
            |s| s.to_vec(),
        );
        assert_eq!(frame.y_range, (-5.0, 5.0));
    }
}
