// src/dsp/mod.rs
// 信号处理子模块
pub mod bounds;
pub mod buffer;
pub mod display;
pub mod error;
pub mod fft;
pub mod filter;
pub mod pipeline;
pub mod smoothing;
pub mod source;
pub mod window;
// 公开导出常用类型，方便外部调用
pub use bounds::{compute_channel_bounds, select_bounds, BoundsMode, ChannelBounds};
pub use buffer::RingBuffer;
pub use display::{
    channel_spacing, BandPowerFrame, ChannelTrace, DisplayMode, SpectrumFrame, TraceLayout,
    WaveformFrame,
};
pub use error::EngineError;
pub use fft::{Band, PowerSpectrum, Psd, SpectrumAnalyzer};
pub use filter::{butter_bandpass, iir_notch, IirCoefficients};
pub use pipeline::{FilterPipeline, FilterSettings};
pub use smoothing::{moving_average, AxisCeiling, SpectralSmoother};
pub use source::{ChunkPublisher, CollectingPublisher, ManualSource, StreamSource, SyntheticSource};
pub use window::WindowSegmenter;
