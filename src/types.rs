// src/types.rs
use ndarray::Array2;
use serde::{Deserialize, Deserializer, Serialize};

use crate::dsp::EngineError;

/// Which data path drives the displays.
#[derive(PartialEq, Eq, Clone, Copy, Debug, Default)]
pub enum EngineMode {
    #[default]
    File,
    Stream,
}

impl EngineMode {
    pub fn name(self) -> &'static str {
        match self {
            EngineMode::File => "file",
            EngineMode::Stream => "stream",
        }
    }
}

fn truncated_rate<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let rate: Option<f64> = Option::deserialize(deserializer)?;
    Ok(rate.filter(|r| r.is_finite() && *r >= 1.0).map(|r| r as u32))
}

/// Side information delivered by a file decoder alongside the sample matrix.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileMetadata {
    #[serde(alias = "sfreq", deserialize_with = "truncated_rate")]
    pub sampling_rate: Option<u32>,
    #[serde(alias = "ch_names")]
    pub channel_names: Option<Vec<String>>,
}

/// Synthesised label of a channel whose name is unknown (1-based).
pub fn default_channel_name(index: usize) -> String {
    format!("Ch{}", index + 1)
}

/// A decoded finite recording: `channels × samples` microvolts.
#[derive(Clone, Debug)]
pub struct Recording {
    data: Array2<f64>,
    sampling_rate: u32,
    channel_names: Vec<String>,
}

impl Recording {
    /// Adopt a decoded matrix. Missing or short name lists are completed with `Ch{n}`.
    pub fn new(
        data: Array2<f64>,
        metadata: &FileMetadata,
        fallback_rate: u32,
    ) -> Result<Self, EngineError> {
        if data.nrows() == 0 {
            return Err(EngineError::EmptyRecording);
        }
        let sampling_rate = metadata.sampling_rate.unwrap_or(fallback_rate);
        if sampling_rate == 0 {
            return Err(EngineError::InvalidSampleRate);
        }
        let given = metadata.channel_names.as_deref().unwrap_or(&[]);
        let channel_names = (0..data.nrows())
            .map(|i| given.get(i).cloned().unwrap_or_else(|| default_channel_name(i)))
            .collect();
        Ok(Self {
            data,
            sampling_rate,
            channel_names,
        })
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    pub fn set_sampling_rate(&mut self, sampling_rate: u32) {
        self.sampling_rate = sampling_rate;
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn channel_count(&self) -> usize {
        self.data.nrows()
    }

    pub fn total_samples(&self) -> usize {
        self.data.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_accepts_decoder_keys() {
        let meta: FileMetadata =
            serde_json::from_str(r#"{"sfreq": 250.7, "ch_names": ["Fp1", "Fp2"]}"#).unwrap();
        assert_eq!(meta.sampling_rate, Some(250));
        assert_eq!(meta.channel_names.as_deref(), Some(&["Fp1".to_owned(), "Fp2".to_owned()][..]));

        let empty: FileMetadata = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, FileMetadata::default());
    }

    #[test]
    fn missing_names_are_synthesised() {
        let meta = FileMetadata {
            sampling_rate: None,
            channel_names: Some(vec!["O1".into()]),
        };
        let rec = Recording::new(Array2::zeros((3, 10)), &meta, 125).unwrap();
        assert_eq!(rec.channel_names(), &["O1", "Ch2", "Ch3"]);
        assert_eq!(rec.sampling_rate(), 125);
    }

    #[test]
    fn empty_matrix_is_rejected() {
        let err =
            Recording::new(Array2::zeros((0, 10)), &FileMetadata::default(), 125).unwrap_err();
        assert!(matches!(err, EngineError::EmptyRecording));
    }
}
