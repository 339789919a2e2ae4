use std::collections::VecDeque;
use std::f64::consts::PI;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dsp::EngineError;

/// Anything that yields live chunks (`channels × samples`) on demand.
///
/// A chunk with zero columns means no new data arrived since the last pull.
pub trait StreamSource {
    fn pull_chunk(&mut self) -> Result<Array2<f64>, EngineError>;
    fn channel_count(&self) -> usize;
    fn sampling_rate(&self) -> u32;
}

/// Outward sink for processed chunks. Fire-and-forget.
pub trait ChunkPublisher {
    fn push_chunk(&mut self, chunk: &Array2<f64>);
}

/// In-memory source useful for tests and deterministic playback.
pub struct ManualSource {
    queue: VecDeque<Array2<f64>>,
    channel_count: usize,
    sampling_rate: u32,
}

impl ManualSource {
    pub fn new(
        channel_count: usize,
        sampling_rate: u32,
        chunks: impl IntoIterator<Item = Array2<f64>>,
    ) -> Self {
        Self {
            queue: chunks.into_iter().collect(),
            channel_count,
            sampling_rate,
        }
    }

    pub fn push(&mut self, chunk: Array2<f64>) {
        self.queue.push_back(chunk);
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl StreamSource for ManualSource {
    fn pull_chunk(&mut self) -> Result<Array2<f64>, EngineError> {
        Ok(self
            .queue
            .pop_front()
            .unwrap_or_else(|| Array2::zeros((self.channel_count, 0))))
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }
}

/// Board stand-in: per-channel sine rhythms plus Gaussian-ish noise.
///
/// Each pull returns `samples_per_pull` new samples regardless of wall time.
pub struct SyntheticSource {
    rng: StdRng,
    channel_count: usize,
    sampling_rate: u32,
    samples_per_pull: usize,
    sample_index: u64,
    amplitude_uv: f64,
    noise_uv: f64,
}

impl SyntheticSource {
    pub fn new(
        channel_count: usize,
        sampling_rate: u32,
        samples_per_pull: usize,
        seed: u64,
    ) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            channel_count,
            sampling_rate,
            samples_per_pull,
            sample_index: 0,
            amplitude_uv: 20.0,
            noise_uv: 5.0,
        }
    }

    pub fn with_levels(mut self, amplitude_uv: f64, noise_uv: f64) -> Self {
        self.amplitude_uv = amplitude_uv;
        self.noise_uv = noise_uv;
        self
    }

    /// Dominant rhythm of a channel: walks 6..=24 Hz so channels differ.
    pub fn channel_frequency_hz(channel: usize) -> f64 {
        6.0 + (channel % 10) as f64 * 2.0
    }
}

impl StreamSource for SyntheticSource {
    fn pull_chunk(&mut self) -> Result<Array2<f64>, EngineError> {
        if self.sampling_rate == 0 {
            return Err(EngineError::InvalidSampleRate);
        }
        let fs = self.sampling_rate as f64;
        let start = self.sample_index;
        let mut chunk = Array2::zeros((self.channel_count, self.samples_per_pull));
        for ((ch, i), value) in chunk.indexed_iter_mut() {
            let t = (start + i as u64) as f64 / fs;
            let tone = (2.0 * PI * Self::channel_frequency_hz(ch) * t).sin();
            // Sum of uniforms approximates a normal distribution.
            let noise: f64 = (0..4).map(|_| self.rng.gen_range(-1.0..1.0)).sum::<f64>() / 2.0;
            *value = self.amplitude_uv * tone + self.noise_uv * noise;
        }
        self.sample_index += self.samples_per_pull as u64;
        Ok(chunk)
    }

    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }
}

/// Publisher that keeps everything it was given. Handy for inspection.
#[derive(Default)]
pub struct CollectingPublisher {
    pub chunks: Vec<Array2<f64>>,
}

impl ChunkPublisher for CollectingPublisher {
    fn push_chunk(&mut self, chunk: &Array2<f64>) {
        self.chunks.push(chunk.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_source_drains_then_reports_empty() {
        let mut source = ManualSource::new(2, 125, [Array2::ones((2, 4))]);
        assert_eq!(source.pull_chunk().unwrap().ncols(), 4);
        let empty = source.pull_chunk().unwrap();
        assert_eq!(empty.dim(), (2, 0));

        source.push(Array2::zeros((2, 3)));
        assert_eq!(source.remaining(), 1);
        let mut publisher = CollectingPublisher::default();
        publisher.push_chunk(&source.pull_chunk().unwrap());
        assert_eq!(publisher.chunks.len(), 1);
        assert_eq!(publisher.chunks[0].ncols(), 3);
    }

    #[test]
    fn synthetic_source_is_deterministic_per_seed() {
        let mut a = SyntheticSource::new(3, 250, 10, 7);
        let mut b = SyntheticSource::new(3, 250, 10, 7);
        let first = a.pull_chunk().unwrap();
        assert_eq!(first.dim(), (3, 10));
        assert_eq!(first, b.pull_chunk().unwrap());
        assert_ne!(first, a.pull_chunk().unwrap());
    }

    #[test]
    fn synthetic_source_without_noise_is_a_clean_tone() {
        let mut source = SyntheticSource::new(1, 100, 100, 1).with_levels(1.0, 0.0);
        let chunk = source.pull_chunk().unwrap();
        let f = SyntheticSource::channel_frequency_hz(0);
        for (i, v) in chunk.row(0).iter().enumerate() {
            let expected = (2.0 * PI * f * i as f64 / 100.0).sin();
            assert!((v - expected).abs() < 1e-12);
        }
    }
}
