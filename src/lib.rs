//! Real-time EEG signal processing and buffering.
//!
//! File review goes through window segmentation and whole-recording bounds; live data
//! goes through a stateful band-pass/notch chain into a NaN-padded ring buffer. Both
//! paths end in display-ready waveform, spectrum and band-power frames.
pub mod config;
pub mod driver;
pub mod dsp;
pub mod engine;
pub mod types;

pub use config::EngineConfig;
pub use driver::{spawn_driver, DriverCommand, DriverEvent};
pub use engine::{Engine, TickOutput};
pub use types::{EngineMode, FileMetadata, Recording};
