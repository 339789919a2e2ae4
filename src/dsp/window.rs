/// Fraction of a window that the next window starts after (20 % overlap).
pub const STRIDE_FRACTION: f64 = 0.8;

/// Overlapping navigation windows over a finite recording.
///
/// Pure function of `(sampling_rate, window_length_secs, total_samples)`; rebuild it
/// whenever any of those change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowSegmenter {
    sampling_rate: u32,
    window_length_samples: usize,
    stride: usize,
    total_samples: usize,
    num_windows: usize,
}

impl WindowSegmenter {
    pub fn new(sampling_rate: u32, window_length_secs: f64, total_samples: usize) -> Self {
        let window_length_samples =
            ((window_length_secs * sampling_rate as f64).round().max(0.0) as usize).max(1);
        let stride = ((STRIDE_FRACTION * window_length_samples as f64).round() as usize).max(1);
        let num_windows = if total_samples >= window_length_samples {
            (total_samples - window_length_samples) / stride + 1
        } else {
            1
        };
        Self {
            sampling_rate,
            window_length_samples,
            stride,
            total_samples,
            num_windows: num_windows.max(1),
        }
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn window_length_samples(&self) -> usize {
        self.window_length_samples
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn total_samples(&self) -> usize {
        self.total_samples
    }

    pub fn num_windows(&self) -> usize {
        self.num_windows
    }

    /// `(start, end)` sample indices of a window, clamped to the recording.
    pub fn window_bounds(&self, index: usize) -> (usize, usize) {
        let start = index.saturating_mul(self.stride).min(self.total_samples);
        let end = start
            .saturating_add(self.window_length_samples)
            .min(self.total_samples);
        (start, end)
    }

    /// Window whose start stride contains time `t` (seconds).
    pub fn window_from_time(&self, t: f64) -> usize {
        if !t.is_finite() || t <= 0.0 {
            return 0;
        }
        let sample = (t * self.sampling_rate as f64).floor() as usize;
        (sample / self.stride).min(self.num_windows - 1)
    }

    /// Seconds of the last sample (0 for an empty recording).
    pub fn duration_secs(&self) -> f64 {
        self.total_samples.saturating_sub(1) as f64 / self.sampling_rate.max(1) as f64
    }

    pub fn time_axis(&self) -> Vec<f64> {
        let fs = self.sampling_rate.max(1) as f64;
        (0..self.total_samples).map(|i| i as f64 / fs).collect()
    }

    /// Sample range to draw for a view spanning `[t_min, t_max]` seconds.
    ///
    /// Pads 20 % of the view width on both sides so small pans don't need a refetch.
    pub fn visible_range(&self, t_min: f64, t_max: f64) -> (usize, usize) {
        let fs = self.sampling_rate as f64;
        let padding = (t_max - t_min).max(0.0) * 0.2;
        let t_min = (t_min - padding).max(0.0);
        let t_max = (t_max + padding).min(self.duration_secs());
        let start = (t_min * fs).max(0.0) as usize;
        let end = ((t_max * fs).max(0.0) as usize).min(self.total_samples);
        (start.min(end), end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousand_samples_at_100hz_five_second_windows() {
        let seg = WindowSegmenter::new(100, 5.0, 1000);
        assert_eq!(seg.window_length_samples(), 500);
        assert_eq!(seg.stride(), 400);
        assert_eq!(seg.num_windows(), 2);
        assert_eq!(seg.window_bounds(0), (0, 500));
        assert_eq!(seg.window_bounds(1), (400, 900));
    }

    #[test]
    fn window_count_matches_formula_and_overlap_is_constant() {
        let cases = [(250u32, 2.0, 10_000usize), (125, 10.0, 3_333), (100, 0.1, 57)];
        for &(fs, secs, total) in &cases {
            let seg = WindowSegmenter::new(fs, secs, total);
            let w = seg.window_length_samples();
            let s = seg.stride();
            let expected = if total >= w { (total - w) / s + 1 } else { 1 };
            assert_eq!(seg.num_windows(), expected.max(1));
            for i in 1..seg.num_windows() {
                let (prev_start, prev_end) = seg.window_bounds(i - 1);
                let (start, end) = seg.window_bounds(i);
                assert_eq!(prev_end - prev_start, w);
                assert_eq!(prev_end - start, w - s);
                assert!(end <= total);
            }
        }
    }

    #[test]
    fn last_window_is_clamped() {
        let seg = WindowSegmenter::new(10, 1.0, 25);
        // w = 10, s = 8, windows = (25 - 10) / 8 + 1 = 2
        assert_eq!(seg.num_windows(), 2);
        assert_eq!(seg.window_bounds(5), (25, 25));
    }

    #[test]
    fn sub_sample_window_still_spans_one_sample() {
        // 0.1 s at 4 Hz rounds to zero samples.
        let seg = WindowSegmenter::new(4, 0.1, 10);
        assert_eq!(seg.window_length_samples(), 1);
        assert_eq!(seg.stride(), 1);
        assert_eq!(seg.num_windows(), 10);
        assert_eq!(seg.window_bounds(9), (9, 10));
    }

    #[test]
    fn empty_recording_has_one_window() {
        let seg = WindowSegmenter::new(250, 4.0, 0);
        assert_eq!(seg.num_windows(), 1);
        assert_eq!(seg.window_bounds(0), (0, 0));
        assert_eq!(seg.window_from_time(12.0), 0);
    }

    #[test]
    fn short_recording_still_has_one_window() {
        let seg = WindowSegmenter::new(100, 5.0, 120);
        assert_eq!(seg.num_windows(), 1);
        assert_eq!(seg.window_bounds(0), (0, 120));
    }

    #[test]
    fn time_maps_to_clamped_window_index() {
        let seg = WindowSegmenter::new(100, 5.0, 1000);
        assert_eq!(seg.window_from_time(-1.0), 0);
        assert_eq!(seg.window_from_time(3.99), 0);
        assert_eq!(seg.window_from_time(4.0), 1);
        assert_eq!(seg.window_from_time(9.5), 1);
        assert_eq!(seg.window_from_time(f64::NAN), 0);
    }

    #[test]
    fn visible_range_pads_and_clamps() {
        let seg = WindowSegmenter::new(100, 5.0, 1000);
        assert_eq!(seg.visible_range(2.5, 5.0), (200, 550));
        assert_eq!(seg.visible_range(0.0, 2.5), (0, 300));
        let (start, end) = seg.visible_range(7.5, 10.0);
        assert_eq!(start, 700);
        assert!((998..=1000).contains(&end));
    }
}
