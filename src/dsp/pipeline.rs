use std::collections::BTreeMap;

use log::{debug, warn};
use ndarray::{s, Array2};

use crate::dsp::filter::{butter_bandpass, iir_notch, IirCoefficients};
use crate::dsp::EngineError;

/// Band-pass + notch parameters, independent of the sampling rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSettings {
    pub bandpass_low_hz: f64,
    pub bandpass_high_hz: f64,
    pub order: usize,
    pub notch_hz: f64,
    pub notch_q: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            bandpass_low_hz: 5.0,
            bandpass_high_hz: 35.0,
            order: 2,
            notch_hz: 60.0,
            notch_q: 30.0,
        }
    }
}

struct FilterStages {
    bandpass: IirCoefficients,
    notch: IirCoefficients,
    bandpass_zi: Vec<f64>,
    notch_zi: Vec<f64>,
}

impl FilterStages {
    fn design(settings: &FilterSettings, sample_rate_hz: f64) -> Result<Self, EngineError> {
        let bandpass = butter_bandpass(
            settings.order,
            settings.bandpass_low_hz,
            settings.bandpass_high_hz,
            sample_rate_hz,
        )?;
        let notch = iir_notch(settings.notch_hz, settings.notch_q, sample_rate_hz)?;
        Ok(Self {
            bandpass_zi: bandpass.zi_template(),
            notch_zi: notch.zi_template(),
            bandpass,
            notch,
        })
    }
}

/// Persisted `zi` of both stages for one channel.
#[derive(Clone, Debug, Default, PartialEq)]
struct ChannelFilterState {
    bandpass: Vec<f64>,
    notch: Vec<f64>,
}

fn scaled(template: &[f64], by: f64) -> Vec<f64> {
    template.iter().map(|z| z * by).collect()
}

/// Stateful band-pass → notch → gain chain applied chunk by chunk.
///
/// Output is seamless across arbitrary chunk boundaries: each channel keeps its own
/// filter state between calls. When the coefficients can't be designed the chain
/// degrades to gain-only pass-through.
pub struct FilterPipeline {
    settings: FilterSettings,
    sample_rate_hz: f64,
    stages: Option<FilterStages>,
    states: BTreeMap<usize, ChannelFilterState>,
    channel_count: usize,
    gain: f64,
    warmup_remaining: usize,
}

impl FilterPipeline {
    pub fn new(
        settings: FilterSettings,
        sample_rate_hz: f64,
        channel_count: usize,
        magnitude_scale_percent: f64,
    ) -> Self {
        let mut pipeline = Self {
            settings,
            sample_rate_hz,
            stages: None,
            states: BTreeMap::new(),
            channel_count,
            gain: magnitude_scale_percent / 100.0,
            warmup_remaining: 0,
        };
        pipeline.rebuild();
        pipeline
    }

    fn rebuild(&mut self) {
        self.states.clear();
        self.stages = match FilterStages::design(&self.settings, self.sample_rate_hz) {
            Ok(stages) => {
                debug!(
                    "filter coefficients ready: {:.1}-{:.1} Hz band-pass, {:.1} Hz notch @ {} Hz",
                    self.settings.bandpass_low_hz,
                    self.settings.bandpass_high_hz,
                    self.settings.notch_hz,
                    self.sample_rate_hz
                );
                Some(stages)
            }
            Err(err) => {
                warn!("filtering disabled: {err}");
                None
            }
        };
    }

    /// New sampling rate: coefficients are redesigned and every channel state dropped.
    pub fn set_sample_rate(&mut self, sample_rate_hz: f64) {
        self.sample_rate_hz = sample_rate_hz;
        self.rebuild();
    }

    pub fn set_settings(&mut self, settings: FilterSettings) {
        self.settings = settings;
        self.rebuild();
    }

    pub fn set_channel_count(&mut self, channel_count: usize) {
        self.channel_count = channel_count;
        self.states.retain(|&ch, _| ch < channel_count);
    }

    pub fn set_magnitude_scale(&mut self, percent: f64) {
        self.gain = percent / 100.0;
    }

    pub fn is_filtering(&self) -> bool {
        self.stages.is_some()
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn seeded_channels(&self) -> usize {
        self.states.len()
    }

    /// Forget every channel state and any pending warmup.
    pub fn reset(&mut self) {
        self.states.clear();
        self.warmup_remaining = 0;
    }

    /// Filter and scale one `channels × samples` chunk.
    pub fn process_chunk(&mut self, chunk: &Array2<f64>) -> Result<Array2<f64>, EngineError> {
        if chunk.nrows() != self.channel_count {
            return Err(EngineError::ChannelMismatch {
                expected: self.channel_count,
                actual: chunk.nrows(),
            });
        }
        let mut output = Array2::zeros(chunk.raw_dim());
        let rows = chunk.rows().into_iter().zip(output.rows_mut());
        for (ch, (row, mut out_row)) in rows.enumerate() {
            let samples = row.to_vec();
            let filtered = match self.filter_channel(ch, &samples) {
                Ok(filtered) => filtered,
                Err(err) => {
                    warn!("{err}; passing chunk through unfiltered");
                    samples
                }
            };
            for (dst, v) in out_row.iter_mut().zip(filtered) {
                *dst = v * self.gain;
            }
        }
        Ok(output)
    }

    fn filter_channel(
        &mut self,
        channel: usize,
        samples: &[f64],
    ) -> Result<Vec<f64>, EngineError> {
        let Some(stages) = &self.stages else {
            return Ok(samples.to_vec());
        };
        let Some(&first) = samples.first() else {
            return Ok(Vec::new());
        };
        let mut state = match self.states.get(&channel) {
            Some(existing) => existing.clone(),
            None => ChannelFilterState {
                bandpass: scaled(&stages.bandpass_zi, first),
                notch: scaled(&stages.notch_zi, first),
            },
        };
        if state.bandpass.len() != stages.bandpass.order()
            || state.notch.len() != stages.notch.order()
        {
            return Err(EngineError::Filter {
                channel,
                reason: "state length does not match filter order".into(),
            });
        }
        let banded = stages.bandpass.filter_chunk(samples, &mut state.bandpass);
        let notched = stages.notch.filter_chunk(&banded, &mut state.notch);
        let finite = notched
            .iter()
            .chain(&state.bandpass)
            .chain(&state.notch)
            .all(|v| v.is_finite());
        if !finite {
            return Err(EngineError::Filter {
                channel,
                reason: "non-finite output".into(),
            });
        }
        self.states.insert(channel, state);
        Ok(notched)
    }

    /// Start discarding the first `warmup_secs` of output.
    pub fn begin_warmup(&mut self, sample_rate_hz: f64, warmup_secs: f64) {
        self.warmup_remaining = (sample_rate_hz * warmup_secs).max(0.0) as usize;
    }

    pub fn warmup_remaining(&self) -> usize {
        self.warmup_remaining
    }

    /// Drop samples still inside the warmup interval; `None` when the whole chunk goes.
    pub fn admit(&mut self, chunk: Array2<f64>) -> Option<Array2<f64>> {
        if self.warmup_remaining == 0 {
            return Some(chunk);
        }
        let n = chunk.ncols();
        if self.warmup_remaining >= n {
            self.warmup_remaining -= n;
            return None;
        }
        let skip = self.warmup_remaining;
        self.warmup_remaining = 0;
        Some(chunk.slice(s![.., skip..]).to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{concatenate, Axis};
    use std::f64::consts::PI;

    fn two_channel_signal(fs: f64, len: usize) -> Array2<f64> {
        Array2::from_shape_fn((2, len), |(ch, i)| {
            let t = i as f64 / fs;
            let base = if ch == 0 { 20.0 } else { -300.0 };
            base + (2.0 * PI * 10.0 * t).sin() * 15.0 + (2.0 * PI * 60.0 * t).sin() * 5.0
        })
    }

    #[test]
    fn chunked_output_matches_single_chunk() {
        let fs = 250.0;
        let signal = two_channel_signal(fs, 600);

        let mut whole = FilterPipeline::new(FilterSettings::default(), fs, 2, 100.0);
        let expected = whole.process_chunk(&signal).unwrap();

        let mut split = FilterPipeline::new(FilterSettings::default(), fs, 2, 100.0);
        let parts: Vec<Array2<f64>> = [0..1usize, 1..250, 250..253, 253..600]
            .into_iter()
            .map(|r| split.process_chunk(&signal.slice(s![.., r]).to_owned()).unwrap())
            .collect();
        let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
        let actual = concatenate(Axis(1), &views).unwrap();

        assert_eq!(expected.dim(), actual.dim());
        for (a, b) in expected.iter().zip(actual.iter()) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
    }

    /// Both stages of a fresh channel start from their templates scaled by the raw first sample.
    fn reference_first_chunk(samples: &[f64], fs: f64) -> Vec<f64> {
        let settings = FilterSettings::default();
        let bandpass = butter_bandpass(
            settings.order,
            settings.bandpass_low_hz,
            settings.bandpass_high_hz,
            fs,
        )
        .unwrap();
        let notch = iir_notch(settings.notch_hz, settings.notch_q, fs).unwrap();
        let mut bp_zi = scaled(&bandpass.zi_template(), samples[0]);
        let mut notch_zi = scaled(&notch.zi_template(), samples[0]);
        let banded = bandpass.filter_chunk(samples, &mut bp_zi);
        notch.filter_chunk(&banded, &mut notch_zi)
    }

    #[test]
    fn notch_is_seeded_from_raw_first_sample() {
        let fs = 125.0;
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), fs, 1, 100.0);
        let chunk = Array2::from_elem((1, 64), 5000.0);
        let out = pipeline.process_chunk(&chunk).unwrap();

        let expected = reference_first_chunk(&[5000.0; 64], fs);
        for (a, b) in out.row(0).iter().zip(&expected) {
            assert!((a - b).abs() < 1e-9, "{a} vs {b}");
        }
        // The band-pass settles on DC, so the notch seeded at 5000 rings.
        assert!(out[[0, 0]].abs() > 1.0);
    }

    #[test]
    fn invalid_band_disables_filtering_but_keeps_gain() {
        // 35 Hz is above Nyquist at 50 Hz sampling.
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), 50.0, 1, 50.0);
        assert!(!pipeline.is_filtering());
        let chunk = Array2::from_shape_vec((1, 3), vec![2.0, 4.0, -6.0]).unwrap();
        let out = pipeline.process_chunk(&chunk).unwrap();
        assert_eq!(out.row(0).to_vec(), vec![1.0, 2.0, -3.0]);
    }

    #[test]
    fn failing_channel_is_isolated() {
        let fs = 250.0;
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), fs, 2, 200.0);
        let mut chunk = Array2::from_elem((2, 8), 10.0);
        chunk[[1, 3]] = f64::NAN;
        let out = pipeline.process_chunk(&chunk).unwrap();
        // Channel 0 filtered, channel 1 passed through with gain.
        let clean = reference_first_chunk(&[10.0; 8], fs);
        for (a, b) in out.row(0).iter().zip(&clean) {
            assert!((a - 2.0 * b).abs() < 1e-9);
        }
        assert_eq!(out[[1, 0]], 20.0);
        assert!(out[[1, 3]].is_nan());
        assert_eq!(pipeline.seeded_channels(), 1);

        // Next clean chunk seeds channel 1 as if it were new.
        let out = pipeline.process_chunk(&Array2::from_elem((2, 8), 10.0)).unwrap();
        for (a, b) in out.row(1).iter().zip(&clean) {
            assert!((a - 2.0 * b).abs() < 1e-9);
        }
        assert_eq!(pipeline.seeded_channels(), 2);
    }

    #[test]
    fn sample_rate_change_clears_state() {
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), 250.0, 2, 100.0);
        pipeline.process_chunk(&Array2::from_elem((2, 4), 1.0)).unwrap();
        assert_eq!(pipeline.seeded_channels(), 2);
        pipeline.set_sample_rate(500.0);
        assert_eq!(pipeline.seeded_channels(), 0);
        assert!(pipeline.is_filtering());
    }

    #[test]
    fn channel_mismatch_is_reported() {
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), 250.0, 2, 100.0);
        let err = pipeline.process_chunk(&Array2::zeros((3, 4))).unwrap_err();
        assert!(matches!(err, EngineError::ChannelMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn warmup_keeps_only_post_warmup_tail() {
        let mut pipeline = FilterPipeline::new(FilterSettings::default(), 100.0, 1, 100.0);
        pipeline.begin_warmup(100.0, 0.5);
        assert_eq!(pipeline.warmup_remaining(), 50);

        let chunk = |start: usize, len: usize| {
            Array2::from_shape_fn((1, len), |(_, i)| (start + i) as f64)
        };
        assert!(pipeline.admit(chunk(0, 30)).is_none());
        assert!(pipeline.admit(chunk(30, 20)).is_none());
        assert_eq!(pipeline.warmup_remaining(), 0);
        let kept = pipeline.admit(chunk(50, 10)).unwrap();
        assert_eq!(kept.ncols(), 10);

        pipeline.begin_warmup(100.0, 0.5);
        let kept = pipeline.admit(chunk(0, 64)).unwrap();
        assert_eq!(kept.row(0).to_vec(), (50..64).map(|v| v as f64).collect::<Vec<_>>());
    }
}
