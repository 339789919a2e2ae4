// src/engine.rs
use std::collections::BTreeSet;

use log::{debug, info, warn};
use ndarray::{s, Array2};

use crate::config::{clamp_window_secs, EngineConfig};
use crate::dsp::buffer::capacity_for;
use crate::dsp::display::build_waveform_frame;
use crate::dsp::fft::Band;
use crate::dsp::smoothing::smooth_display;
use crate::dsp::{
    compute_channel_bounds, select_bounds, BandPowerFrame, BoundsMode, ChannelBounds,
    ChunkPublisher, DisplayMode, EngineError, FilterPipeline, FilterSettings, RingBuffer,
    SpectralSmoother, SpectrumAnalyzer, SpectrumFrame, StreamSource, WaveformFrame,
    WindowSegmenter,
};
use crate::types::{default_channel_name, EngineMode, FileMetadata, Recording};

/// Longest wall-clock step one playback frame may advance.
pub const MAX_PLAYBACK_STEP_SECS: f64 = 0.1;

/// What one tick or playback step produced. Spectral parts are throttled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickOutput {
    pub waveform: Option<WaveformFrame>,
    pub spectrum: Option<SpectrumFrame>,
    pub band_power: Option<BandPowerFrame>,
    /// Samples per channel appended to the ring buffer.
    pub ingested: usize,
}

impl TickOutput {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.waveform.is_none() && self.spectrum.is_none() && self.band_power.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Playback {
    speed: f64,
    center_secs: f64,
    steps: u32,
}

fn spectrum_frame(
    analyzer: &mut SpectrumAnalyzer,
    smoother: &mut SpectralSmoother,
    sample_rate_hz: f64,
    rows: &[(usize, Vec<f64>)],
) -> SpectrumFrame {
    let mut frame = SpectrumFrame::default();
    for (index, samples) in rows {
        let power = analyzer.power_spectrum(samples, sample_rate_hz);
        let display = smoother.smooth_fft(*index, &power.power_db);
        if frame.frequencies_hz.is_empty() {
            frame.frequencies_hz = power.frequencies_hz;
        }
        frame.channels.push((*index, display));
    }
    frame
}

fn band_power_frame(
    analyzer: &mut SpectrumAnalyzer,
    smoother: &mut SpectralSmoother,
    sample_rate_hz: f64,
    rows: &[(usize, Vec<f64>)],
) -> BandPowerFrame {
    let powers = analyzer.band_powers(rows.iter().map(|(_, s)| s.as_slice()), sample_rate_hz);
    let smoothed = smoother.smooth_bands(&powers);
    let axis_ceiling = smoother.observe_band_peak(&smoothed);
    BandPowerFrame {
        bands: Band::ALL.into_iter().zip(smoothed).collect(),
        axis_ceiling,
    }
}

/// Hann FFT curves and Welch band powers for `rows`, folded into the display EMAs.
fn spectral_outputs(
    analyzer: &mut SpectrumAnalyzer,
    smoother: &mut SpectralSmoother,
    sample_rate_hz: f64,
    rows: &[(usize, Vec<f64>)],
) -> (SpectrumFrame, BandPowerFrame) {
    (
        spectrum_frame(analyzer, smoother, sample_rate_hz, rows),
        band_power_frame(analyzer, smoother, sample_rate_hz, rows),
    )
}

/// Finite min/max over the given rows; `None` when nothing finite was seen.
fn finite_extent<'a>(rows: impl IntoIterator<Item = &'a [f64]>) -> Option<(f64, f64)> {
    rows.into_iter()
        .flatten()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Owns every piece of processing state for both file review and live streaming.
///
/// Methods take `&mut self`, so a tick can never overlap another tick or a parameter
/// change. Share it across threads through [`crate::driver`], not a lock.
pub struct Engine {
    config: EngineConfig,
    mode: EngineMode,
    recording: Option<Recording>,
    segmenter: Option<WindowSegmenter>,
    bounds: Vec<ChannelBounds>,
    current_window: usize,
    playback: Option<Playback>,
    pipeline: FilterPipeline,
    buffer: Option<RingBuffer>,
    stream_names: Vec<String>,
    smoother: SpectralSmoother,
    analyzer: SpectrumAnalyzer,
    active: BTreeSet<usize>,
    tick_count: u32,
    publisher: Option<Box<dyn ChunkPublisher + Send>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let pipeline = FilterPipeline::new(
            config.filter_settings(),
            config.sampling_rate as f64,
            0,
            config.magnitude_scale_percent,
        );
        let smoother = SpectralSmoother::new(config.fft_ema_alpha, config.band_power_ema_alpha);
        Self {
            config,
            mode: EngineMode::File,
            recording: None,
            segmenter: None,
            bounds: Vec::new(),
            current_window: 0,
            playback: None,
            pipeline,
            buffer: None,
            stream_names: Vec::new(),
            smoother,
            analyzer: SpectrumAnalyzer::new(),
            active: BTreeSet::new(),
            tick_count: 0,
            publisher: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    pub fn recording(&self) -> Option<&Recording> {
        self.recording.as_ref()
    }

    pub fn segmenter(&self) -> Option<&WindowSegmenter> {
        self.segmenter.as_ref()
    }

    pub fn channel_bounds(&self) -> &[ChannelBounds] {
        &self.bounds
    }

    pub fn buffer(&self) -> Option<&RingBuffer> {
        self.buffer.as_ref()
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    pub fn smoother(&self) -> &SpectralSmoother {
        &self.smoother
    }

    pub fn active_channels(&self) -> &BTreeSet<usize> {
        &self.active
    }

    pub fn set_publisher(&mut self, publisher: Option<Box<dyn ChunkPublisher + Send>>) {
        self.publisher = publisher;
    }

    fn require(&self, mode: EngineMode) -> Result<(), EngineError> {
        if self.mode == mode {
            Ok(())
        } else {
            Err(EngineError::WrongMode {
                expected: mode.name(),
            })
        }
    }

    fn channel_count(&self) -> usize {
        match self.mode {
            EngineMode::File => self.recording.as_ref().map_or(0, Recording::channel_count),
            EngineMode::Stream => self.buffer.as_ref().map_or(0, RingBuffer::channel_count),
        }
    }

    fn channel_name(&self, index: usize) -> String {
        let names = match self.mode {
            EngineMode::File => self.recording.as_ref().map(Recording::channel_names),
            EngineMode::Stream => Some(self.stream_names.as_slice()),
        };
        names
            .and_then(|n| n.get(index).cloned())
            .unwrap_or_else(|| default_channel_name(index))
    }

    fn rebuild_segmenter(&mut self) {
        self.segmenter = self.recording.as_ref().map(|rec| {
            WindowSegmenter::new(
                rec.sampling_rate(),
                self.config.window_length_secs,
                rec.total_samples(),
            )
        });
        if let Some(seg) = &self.segmenter {
            self.current_window = self.current_window.min(seg.num_windows() - 1);
        }
    }

    // ---- parameters -------------------------------------------------------

    /// Adopt a decoded recording. Metadata overrides the configured rate and names.
    pub fn load_recording(
        &mut self,
        data: Array2<f64>,
        metadata: FileMetadata,
    ) -> Result<(), EngineError> {
        self.require(EngineMode::File)?;
        let recording = Recording::new(data, &metadata, self.config.sampling_rate)?;
        info!(
            "loaded recording: {} channels x {} samples @ {} Hz",
            recording.channel_count(),
            recording.total_samples(),
            recording.sampling_rate()
        );
        self.config.sampling_rate = recording.sampling_rate();
        self.bounds = compute_channel_bounds(recording.data());
        self.pipeline.set_sample_rate(recording.sampling_rate() as f64);
        self.recording = Some(recording);
        self.smoother.clear();
        self.playback = None;
        self.current_window = 0;
        self.active = BTreeSet::from([0]);
        self.rebuild_segmenter();
        Ok(())
    }

    /// Change the sampling rate. Windows and bounds are rederived for a loaded file.
    pub fn set_sampling_rate(&mut self, sampling_rate: u32) -> Result<(), EngineError> {
        self.require(EngineMode::File)?;
        if sampling_rate == 0 {
            return Err(EngineError::InvalidSampleRate);
        }
        self.config.sampling_rate = sampling_rate;
        self.pipeline.set_sample_rate(sampling_rate as f64);
        if let Some(rec) = self.recording.as_mut() {
            rec.set_sampling_rate(sampling_rate);
            self.bounds = compute_channel_bounds(rec.data());
        }
        self.rebuild_segmenter();
        Ok(())
    }

    /// Clamped to `[0.1, 60]` s. Streaming resizes the ring buffer in place.
    pub fn set_window_length(&mut self, secs: f64) {
        self.config.window_length_secs = clamp_window_secs(secs);
        match self.mode {
            EngineMode::File => {
                self.playback = None;
                self.rebuild_segmenter();
            }
            EngineMode::Stream => {
                if let Some(buffer) = self.buffer.as_mut() {
                    let capacity = capacity_for(
                        self.config.sampling_rate as f64,
                        self.config.window_length_secs,
                    );
                    buffer.resize(capacity);
                    debug!("stream buffer resized to {capacity} samples");
                }
                self.smoother.clear_fft();
            }
        }
    }

    pub fn set_filter_settings(&mut self, settings: FilterSettings) {
        self.config.bandpass_low_hz = settings.bandpass_low_hz;
        self.config.bandpass_high_hz = settings.bandpass_high_hz;
        self.config.filter_order = settings.order;
        self.config.notch_hz = settings.notch_hz;
        self.config.notch_q = settings.notch_q;
        self.pipeline.set_settings(settings);
    }

    pub fn set_magnitude_scale(&mut self, percent: f64) {
        self.config.magnitude_scale_percent = percent;
        self.pipeline.set_magnitude_scale(percent);
    }

    pub fn set_smoothing(&mut self, enabled: bool, window_ms: f64) {
        self.config.smoothing_enabled = enabled;
        self.config.smoothing_window_ms = window_ms.max(0.0);
    }

    pub fn set_bounds_mode(&mut self, mode: BoundsMode) {
        self.config.bounds_mode = mode;
    }

    pub fn set_display_mode(&mut self, mode: DisplayMode) {
        self.config.display_mode = mode;
    }

    /// Replace the displayed channel set. Unknown indices are dropped.
    pub fn set_active_channels(&mut self, channels: impl IntoIterator<Item = usize>) {
        let count = self.channel_count();
        self.active = channels.into_iter().filter(|&ch| ch < count).collect();
        self.smoother.retain_channels(&self.active);
    }

    /// Show or hide one channel. Out-of-range indices are ignored.
    pub fn toggle_channel(&mut self, channel: usize, enabled: bool) {
        if channel >= self.channel_count() {
            return;
        }
        if enabled {
            self.active.insert(channel);
        } else {
            self.active.remove(&channel);
            self.smoother.retain_channels(&self.active);
        }
    }

    // ---- file mode --------------------------------------------------------

    pub fn current_window(&self) -> usize {
        self.current_window
    }

    /// Jump to a window (clamped); stops playback.
    pub fn navigate_to_window(&mut self, index: usize) -> Result<usize, EngineError> {
        self.require(EngineMode::File)?;
        let seg = self.segmenter.ok_or(EngineError::EmptyRecording)?;
        self.playback = None;
        self.current_window = index.min(seg.num_windows() - 1);
        Ok(self.current_window)
    }

    /// Seconds of the first and last sample of the current window.
    fn window_span_secs(&self) -> Option<(f64, f64)> {
        let seg = self.segmenter.as_ref()?;
        let fs = seg.sampling_rate() as f64;
        let (start, end) = seg.window_bounds(self.current_window);
        Some((start as f64 / fs, end.saturating_sub(1).max(start) as f64 / fs))
    }

    fn file_frame(&self, t_start: f64, t_end: f64) -> Option<WaveformFrame> {
        if self.mode != EngineMode::File {
            return None;
        }
        let rec = self.recording.as_ref()?;
        let seg = self.segmenter.as_ref()?;
        if self.active.is_empty() {
            return None;
        }
        let fs = rec.sampling_rate() as f64;
        let (start, end) = seg.visible_range(t_start, t_end);
        let time_axis = (start..end).map(|i| i as f64 / fs).collect();
        let channels = self.active.iter().filter_map(|&ch| {
            let name = rec.channel_names().get(ch)?;
            Some((ch, name.as_str(), rec.data().slice(s![ch, start..end])))
        });
        let overlay_range = select_bounds(
            &self.bounds,
            self.active.iter().copied(),
            self.config.bounds_mode,
        );
        Some(build_waveform_frame(
            time_axis,
            channels,
            &self.config.trace_layout(),
            overlay_range,
            |samples| samples.to_vec(),
        ))
    }

    /// Waveform of the current window plus the visible-range padding.
    pub fn window_frame(&self) -> Option<WaveformFrame> {
        let (t_start, t_end) = self.window_span_secs()?;
        self.file_frame(t_start, t_end)
    }

    fn window_rows(&self) -> Option<(f64, Vec<(usize, Vec<f64>)>)> {
        if self.mode != EngineMode::File {
            return None;
        }
        let rec = self.recording.as_ref()?;
        let seg = self.segmenter.as_ref()?;
        if self.active.is_empty() {
            return None;
        }
        let (start, end) = seg.window_bounds(self.current_window);
        let rows = self
            .active
            .iter()
            .filter(|&&ch| ch < rec.channel_count())
            .map(|&ch| (ch, rec.data().slice(s![ch, start..end]).to_vec()))
            .collect();
        Some((rec.sampling_rate() as f64, rows))
    }

    fn file_spectral(&mut self) -> Option<(SpectrumFrame, BandPowerFrame)> {
        let (fs, rows) = self.window_rows()?;
        self.smoother.retain_channels(&self.active);
        Some(spectral_outputs(&mut self.analyzer, &mut self.smoother, fs, &rows))
    }

    /// Smoothed FFT curves of the current window.
    pub fn file_spectrum(&mut self) -> Option<SpectrumFrame> {
        let (fs, rows) = self.window_rows()?;
        self.smoother.retain_channels(&self.active);
        Some(spectrum_frame(&mut self.analyzer, &mut self.smoother, fs, &rows))
    }

    /// Smoothed band powers of the current window.
    pub fn file_band_power(&mut self) -> Option<BandPowerFrame> {
        let (fs, rows) = self.window_rows()?;
        Some(band_power_frame(&mut self.analyzer, &mut self.smoother, fs, &rows))
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Start autoplay from the middle of the current window.
    pub fn start_playback(&mut self, speed: f64) -> Result<(), EngineError> {
        self.require(EngineMode::File)?;
        let (t_start, t_end) = self.window_span_secs().ok_or(EngineError::EmptyRecording)?;
        self.playback = Some(Playback {
            speed: speed.max(0.0),
            center_secs: (t_start + t_end) / 2.0,
            steps: 0,
        });
        debug!("playback started at {:.2} s, speed x{speed}", (t_start + t_end) / 2.0);
        Ok(())
    }

    pub fn stop_playback(&mut self) {
        self.playback = None;
    }

    /// Advance autoplay by wall-clock `elapsed_secs`, looping near the end.
    pub fn playback_step(&mut self, elapsed_secs: f64) -> TickOutput {
        let (Some(mut playback), Some(seg)) = (self.playback, self.segmenter) else {
            return TickOutput::idle();
        };
        if self.active.is_empty() {
            return TickOutput::idle();
        }
        let elapsed = if elapsed_secs.is_finite() {
            elapsed_secs.clamp(0.0, MAX_PLAYBACK_STEP_SECS)
        } else {
            0.0
        };
        let window = self.config.window_length_secs;
        let half = window / 2.0;
        let total = seg.duration_secs();

        playback.center_secs += elapsed * playback.speed;
        if playback.center_secs >= total - half {
            playback.center_secs = half;
        }
        let (mut t_start, mut t_end) = (playback.center_secs - half, playback.center_secs + half);
        if t_start < 0.0 {
            t_start = 0.0;
            t_end = window;
        }
        if t_end > total {
            t_end = total;
            t_start = t_end - window;
        }
        self.current_window = seg.window_from_time((t_start + t_end) / 2.0);

        let mut output = TickOutput {
            waveform: self.file_frame(t_start, t_end),
            ..TickOutput::default()
        };
        playback.steps += 1;
        if playback.steps >= self.config.playback_spectral_interval {
            playback.steps = 0;
            if let Some((spectrum, bands)) = self.file_spectral() {
                output.spectrum = Some(spectrum);
                output.band_power = Some(bands);
            }
        }
        self.playback = Some(playback);
        output
    }

    // ---- stream mode ------------------------------------------------------

    /// Switch to streaming with a fresh NaN buffer, filter state and warmup.
    pub fn start_stream(
        &mut self,
        channel_count: usize,
        sampling_rate: u32,
    ) -> Result<(), EngineError> {
        if sampling_rate == 0 {
            return Err(EngineError::InvalidSampleRate);
        }
        if channel_count == 0 {
            return Err(EngineError::EmptyRecording);
        }
        let fs = sampling_rate as f64;
        let buffer =
            RingBuffer::with_history_seconds(channel_count, fs, self.config.window_length_secs)?;
        self.playback = None;
        self.mode = EngineMode::Stream;
        self.config.sampling_rate = sampling_rate;
        self.buffer = Some(buffer);
        self.stream_names = (0..channel_count).map(default_channel_name).collect();
        self.pipeline.set_channel_count(channel_count);
        self.pipeline.set_sample_rate(fs);
        self.pipeline.reset();
        self.pipeline.begin_warmup(fs, self.config.warmup_secs);
        self.smoother.clear();
        self.active = (0..channel_count).collect();
        self.tick_count = 0;
        info!(
            "stream started: {channel_count} channels @ {sampling_rate} Hz, warmup {} samples",
            self.pipeline.warmup_remaining()
        );
        Ok(())
    }

    /// Name the stream's channels; missing entries keep their `Ch{n}` label.
    pub fn set_stream_channel_names(&mut self, names: impl IntoIterator<Item = String>) {
        for (slot, name) in self.stream_names.iter_mut().zip(names) {
            *slot = name;
        }
    }

    /// Pull once from `source` and refresh the live displays.
    pub fn tick(&mut self, source: &mut dyn StreamSource) -> TickOutput {
        if self.mode != EngineMode::Stream {
            return TickOutput::idle();
        }
        let chunk = match source.pull_chunk() {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!("stream pull failed: {err}");
                return TickOutput::idle();
            }
        };
        if chunk.ncols() == 0 {
            return TickOutput::idle();
        }
        let processed = match self.pipeline.process_chunk(&chunk) {
            Ok(processed) => processed,
            Err(err) => {
                warn!("dropping chunk: {err}");
                return TickOutput::idle();
            }
        };
        if let Some(publisher) = self.publisher.as_mut() {
            publisher.push_chunk(&processed);
        }
        let Some(admitted) = self.pipeline.admit(processed) else {
            return TickOutput::idle();
        };
        let Some(buffer) = self.buffer.as_mut() else {
            return TickOutput::idle();
        };
        if let Err(err) = buffer.append(admitted.view()) {
            warn!("dropping chunk: {err}");
            return TickOutput::idle();
        }

        let mut output = TickOutput {
            waveform: self.stream_frame(),
            ingested: admitted.ncols(),
            ..TickOutput::default()
        };
        self.tick_count += 1;
        if self.tick_count >= self.config.stream_spectral_interval {
            self.tick_count = 0;
            if let Some((spectrum, bands)) = self.stream_spectral() {
                output.spectrum = Some(spectrum);
                output.band_power = Some(bands);
            }
        }
        output
    }

    /// Current live waveform with display smoothing applied.
    pub fn stream_frame(&self) -> Option<WaveformFrame> {
        let buffer = self.buffer.as_ref()?;
        if self.active.is_empty() {
            return None;
        }
        let fs = self.config.sampling_rate as f64;
        let (enabled, window_ms) = (self.config.smoothing_enabled, self.config.smoothing_window_ms);
        let names: Vec<String> = self.active.iter().map(|&ch| self.channel_name(ch)).collect();
        let rows: Vec<_> = self
            .active
            .iter()
            .filter_map(|&ch| buffer.channel(ch).map(|row| (ch, row)))
            .collect();
        let overlay_range = finite_extent(rows.iter().filter_map(|(_, row)| row.to_slice()))
            .unwrap_or(crate::dsp::bounds::DEFAULT_BOUNDS);
        let channels = rows
            .into_iter()
            .zip(&names)
            .map(|((ch, row), name)| (ch, name.as_str(), row));
        Some(build_waveform_frame(
            buffer.time_axis(fs),
            channels,
            &self.config.trace_layout(),
            overlay_range,
            |samples| smooth_display(samples, enabled, window_ms, fs),
        ))
    }

    fn stream_spectral(&mut self) -> Option<(SpectrumFrame, BandPowerFrame)> {
        let buffer = self.buffer.as_ref()?;
        if self.active.is_empty() {
            return None;
        }
        let rows: Vec<(usize, Vec<f64>)> = self
            .active
            .iter()
            .filter_map(|&ch| buffer.channel(ch).map(|row| (ch, row.to_vec())))
            .collect();
        Some(spectral_outputs(
            &mut self.analyzer,
            &mut self.smoother,
            self.config.sampling_rate as f64,
            &rows,
        ))
    }

    /// Leave streaming. Filter state, EMA caches, the buffer and warmup are dropped.
    pub fn stop_stream(&mut self) {
        if self.mode != EngineMode::Stream {
            return;
        }
        self.mode = EngineMode::File;
        self.pipeline.reset();
        self.smoother.clear();
        self.buffer = None;
        self.stream_names.clear();
        self.tick_count = 0;
        self.active = if self.recording.is_some() {
            BTreeSet::from([0])
        } else {
            BTreeSet::new()
        };
        if let Some(rec) = &self.recording {
            self.config.sampling_rate = rec.sampling_rate();
            self.pipeline.set_sample_rate(rec.sampling_rate() as f64);
        }
        info!("stream stopped");
    }
}
