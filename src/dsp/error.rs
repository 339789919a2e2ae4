use thiserror::Error;
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("sample rate must be greater than zero")]
    InvalidSampleRate,
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("recording has no channels")]
    EmptyRecording,
    #[error("filter design rejected: {0}")]
    FilterDesign(String),
    #[error("filter failed on channel {channel}: {reason}")]
    Filter { channel: usize, reason: String },
    #[error("stream source failed: {0}")]
    Source(String),
    #[error("operation requires {expected} mode")]
    WrongMode { expected: &'static str },
    #[error("failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),
}
