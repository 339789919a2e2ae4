use ndarray::{s, Array2, ArrayView1, ArrayView2};

use crate::dsp::EngineError;

/// Smallest capacity a buffer is ever resized to.
pub const MIN_CAPACITY: usize = 10;

/// Samples needed to hold `window_secs` of history at `sample_rate_hz`.
pub fn capacity_for(sample_rate_hz: f64, window_secs: f64) -> usize {
    ((sample_rate_hz * window_secs).round().max(0.0) as usize).max(MIN_CAPACITY)
}

/// Rolling buffer that stores the most recent samples per channel, newest on the right.
///
/// Cells that have never been written hold NaN so a renderer draws a gap rather than a
/// flat line at zero.
#[derive(Clone, Debug)]
pub struct RingBuffer {
    data: Array2<f64>, // channels x capacity
    filled: usize,
}

impl RingBuffer {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        Self {
            data: Array2::from_elem((channel_count, capacity.max(MIN_CAPACITY)), f64::NAN),
            filled: 0,
        }
    }

    pub fn with_history_seconds(
        channel_count: usize,
        sample_rate_hz: f64,
        history_seconds: f64,
    ) -> Result<Self, EngineError> {
        if sample_rate_hz <= 0.0 {
            return Err(EngineError::InvalidSampleRate);
        }
        Ok(Self::new(
            channel_count,
            capacity_for(sample_rate_hz, history_seconds),
        ))
    }

    pub fn capacity(&self) -> usize {
        self.data.ncols()
    }

    pub fn channel_count(&self) -> usize {
        self.data.nrows()
    }

    /// Number of trailing cells holding real samples.
    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn channel(&self, index: usize) -> Option<ArrayView1<'_, f64>> {
        (index < self.channel_count()).then(|| self.data.row(index))
    }

    pub fn append(&mut self, chunk: ArrayView2<'_, f64>) -> Result<(), EngineError> {
        if chunk.nrows() != self.channel_count() {
            return Err(EngineError::ChannelMismatch {
                expected: self.channel_count(),
                actual: chunk.nrows(),
            });
        }
        let capacity = self.capacity();
        let n = chunk.ncols();
        if n == 0 {
            return Ok(());
        }
        if n >= capacity {
            self.data.assign(&chunk.slice(s![.., n - capacity..]));
        } else {
            for (mut row, new_samples) in self.data.rows_mut().into_iter().zip(chunk.rows()) {
                for i in 0..capacity - n {
                    row[i] = row[i + n];
                }
                row.slice_mut(s![capacity - n..]).assign(&new_samples);
            }
        }
        self.filled = (self.filled + n).min(capacity);
        Ok(())
    }

    /// Change capacity, keeping the most recent `min(old, new)` samples right-aligned.
    pub fn resize(&mut self, new_capacity: usize) {
        let new_capacity = new_capacity.max(MIN_CAPACITY);
        let old_capacity = self.capacity();
        if new_capacity == old_capacity {
            return;
        }
        let keep = old_capacity.min(new_capacity);
        let mut resized = Array2::from_elem((self.channel_count(), new_capacity), f64::NAN);
        resized
            .slice_mut(s![.., new_capacity - keep..])
            .assign(&self.data.slice(s![.., old_capacity - keep..]));
        self.data = resized;
        self.filled = self.filled.min(keep);
    }

    pub fn clear(&mut self) {
        self.data.fill(f64::NAN);
        self.filled = 0;
    }

    /// Seconds since the oldest cell, one entry per column.
    pub fn time_axis(&self, sample_rate_hz: f64) -> Vec<f64> {
        (0..self.capacity())
            .map(|i| i as f64 / sample_rate_hz)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp(channels: usize, start: usize, len: usize) -> Array2<f64> {
        Array2::from_shape_fn((channels, len), |(ch, i)| (ch * 1000 + start + i) as f64)
    }

    #[test]
    fn starts_empty_with_nan() {
        let buffer = RingBuffer::with_history_seconds(2, 125.0, 1.0).unwrap();
        assert_eq!(buffer.capacity(), 125);
        assert!(buffer.data().iter().all(|v| v.is_nan()));
        assert!(RingBuffer::with_history_seconds(2, 0.0, 1.0).is_err());
    }

    #[test]
    fn append_shifts_left_and_writes_tail() {
        let mut buffer = RingBuffer::new(1, 10);
        buffer.append(ramp(1, 0, 4).view()).unwrap();
        let row = buffer.channel(0).unwrap();
        assert!(row.iter().take(6).all(|v| v.is_nan()));
        assert_eq!(row.slice(s![6..]).to_vec(), vec![0.0, 1.0, 2.0, 3.0]);

        buffer.append(ramp(1, 4, 3).view()).unwrap();
        let row = buffer.channel(0).unwrap();
        assert_eq!(row.slice(s![3..]).to_vec(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(buffer.filled(), 7);
    }

    #[test]
    fn oversized_chunk_keeps_trailing_samples() {
        let mut buffer = RingBuffer::new(2, 10);
        buffer.append(ramp(2, 0, 25).view()).unwrap();
        assert_eq!(buffer.data(), &ramp(2, 15, 10));
        assert!(buffer.is_full());
    }

    #[test]
    fn resize_preserves_recent_history() {
        let mut buffer = RingBuffer::new(1, 12);
        buffer.append(ramp(1, 0, 12).view()).unwrap();

        buffer.resize(10);
        let expected: Vec<f64> = (2..12).map(|v| v as f64).collect();
        assert_eq!(buffer.channel(0).unwrap().to_vec(), expected);

        buffer.resize(15);
        let row = buffer.channel(0).unwrap();
        assert!(row.iter().take(5).all(|v| v.is_nan()));
        assert_eq!(row.slice(s![5..]).to_vec(), (2..12).map(|v| v as f64).collect::<Vec<_>>());
        assert_eq!(buffer.filled(), 10);
    }

    #[test]
    fn resize_floors_capacity() {
        let mut buffer = RingBuffer::new(1, 50);
        buffer.resize(3);
        assert_eq!(buffer.capacity(), MIN_CAPACITY);
    }

    #[test]
    fn resize_then_full_append_has_no_gaps() {
        let mut buffer = RingBuffer::new(3, 40);
        buffer.append(ramp(3, 0, 7).view()).unwrap();
        buffer.resize(64);
        let fresh = ramp(3, 100, 64);
        buffer.append(fresh.view()).unwrap();
        assert!(buffer.data().iter().all(|v| !v.is_nan()));
        assert_eq!(buffer.data(), &fresh);
    }

    #[test]
    fn rejects_wrong_channel_count() {
        let mut buffer = RingBuffer::new(2, 10);
        let err = buffer.append(array![[1.0, 2.0]].view()).unwrap_err();
        assert!(matches!(err, EngineError::ChannelMismatch { expected: 2, actual: 1 }));
    }

    #[test]
    fn clear_refills_with_nan() {
        let mut buffer = RingBuffer::new(1, 10);
        buffer.append(ramp(1, 0, 10).view()).unwrap();
        buffer.clear();
        assert_eq!(buffer.filled(), 0);
        assert!(buffer.data().iter().all(|v| v.is_nan()));
    }
}
