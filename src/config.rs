// src/config.rs
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dsp::{BoundsMode, DisplayMode, EngineError, FilterSettings, TraceLayout};

pub const MIN_WINDOW_SECS: f64 = 0.1;
pub const MAX_WINDOW_SECS: f64 = 60.0;

/// Runtime options of the engine. Every key is optional in JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sampling_rate: u32,
    pub window_length_secs: f64,
    pub bandpass_low_hz: f64,
    pub bandpass_high_hz: f64,
    pub filter_order: usize,
    pub notch_hz: f64,
    pub notch_q: f64,
    pub magnitude_scale_percent: f64,
    pub smoothing_enabled: bool,
    pub smoothing_window_ms: f64,
    pub bounds_mode: BoundsMode,
    pub fft_ema_alpha: f64,
    pub band_power_ema_alpha: f64,
    pub warmup_secs: f64,
    pub stream_spectral_interval: u32,
    pub playback_spectral_interval: u32,
    pub tick_ms: u64,
    pub display_mode: DisplayMode,
    pub total_y_span: f64,
    pub amplitude_scale: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Cyton board rate.
        Self {
            sampling_rate: 125,
            window_length_secs: 10.0,
            bandpass_low_hz: 5.0,
            bandpass_high_hz: 35.0,
            filter_order: 2,
            notch_hz: 60.0,
            notch_q: 30.0,
            magnitude_scale_percent: 100.0,
            smoothing_enabled: true,
            smoothing_window_ms: 120.0,
            bounds_mode: BoundsMode::Iqr,
            fft_ema_alpha: 0.2,
            band_power_ema_alpha: 0.2,
            warmup_secs: 0.5,
            stream_spectral_interval: 3,
            playback_spectral_interval: 5,
            tick_ms: 16,
            display_mode: DisplayMode::Stacked,
            total_y_span: 1600.0,
            amplitude_scale: 1.0,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(json)?;
        config.sanitized()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Clamp ranged options. Filter parameters are left alone: bad ones only disable
    /// filtering once coefficients are designed.
    pub fn sanitized(mut self) -> Result<Self, EngineError> {
        if self.sampling_rate == 0 {
            return Err(EngineError::InvalidSampleRate);
        }
        self.window_length_secs = clamp_window_secs(self.window_length_secs);
        self.fft_ema_alpha = clamp_unit(self.fft_ema_alpha, 0.2);
        self.band_power_ema_alpha = clamp_unit(self.band_power_ema_alpha, 0.2);
        self.stream_spectral_interval = self.stream_spectral_interval.max(1);
        self.playback_spectral_interval = self.playback_spectral_interval.max(1);
        self.warmup_secs = self.warmup_secs.max(0.0);
        self.smoothing_window_ms = self.smoothing_window_ms.max(0.0);
        self.tick_ms = self.tick_ms.max(1);
        Ok(self)
    }

    pub fn filter_settings(&self) -> FilterSettings {
        FilterSettings {
            bandpass_low_hz: self.bandpass_low_hz,
            bandpass_high_hz: self.bandpass_high_hz,
            order: self.filter_order,
            notch_hz: self.notch_hz,
            notch_q: self.notch_q,
        }
    }

    pub fn trace_layout(&self) -> TraceLayout {
        TraceLayout {
            mode: self.display_mode,
            total_y_span: self.total_y_span,
            amplitude_scale: self.amplitude_scale,
        }
    }
}

pub fn clamp_window_secs(secs: f64) -> f64 {
    if secs.is_nan() {
        return MIN_WINDOW_SECS;
    }
    secs.clamp(MIN_WINDOW_SECS, MAX_WINDOW_SECS)
}

fn clamp_unit(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.filter_settings(), FilterSettings::default());
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"sampling_rate": 250, "bounds_mode": "minmax", "display_mode": "overlay"}"#,
        )
        .unwrap();
        assert_eq!(config.sampling_rate, 250);
        assert_eq!(config.bounds_mode, BoundsMode::MinMax);
        assert_eq!(config.display_mode, DisplayMode::Overlay);
        assert_eq!(config.notch_hz, 60.0);
    }

    #[test]
    fn ranged_options_are_clamped() {
        let config = EngineConfig::from_json_str(
            r#"{"window_length_secs": 500, "fft_ema_alpha": 3.0, "stream_spectral_interval": 0}"#,
        )
        .unwrap();
        assert_eq!(config.window_length_secs, MAX_WINDOW_SECS);
        assert_eq!(config.fft_ema_alpha, 1.0);
        assert_eq!(config.stream_spectral_interval, 1);
        assert_eq!(clamp_window_secs(0.0), MIN_WINDOW_SECS);
    }

    #[test]
    fn bad_input_is_reported() {
        assert!(matches!(
            EngineConfig::from_json_str("{not json"),
            Err(EngineError::ConfigParse(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_str(r#"{"sampling_rate": 0}"#),
            Err(EngineError::InvalidSampleRate)
        ));
        assert!(matches!(
            EngineConfig::load("/definitely/not/here.json"),
            Err(EngineError::ConfigIo(_))
        ));
    }

    #[test]
    fn inverted_band_is_accepted_at_config_time() {
        let config =
            EngineConfig::from_json_str(r#"{"bandpass_low_hz": 40, "bandpass_high_hz": 10}"#);
        assert!(config.is_ok());
    }
}
