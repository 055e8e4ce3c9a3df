// sweeper-core/src/lib.rs

//! The core of the audio sweeper: tone generation, level metering, frequency
//! sweeps, multi-track spectrum storage and the live FFT.
//! This crate is completely headless and contains no presentation code;
//! front ends drive an [`Engine`] and poll its published state.

pub mod audio;
pub mod config;
pub mod engine;
pub mod fft;
pub mod frequency_map;
pub mod level;
pub mod mode;
pub mod processor;
pub mod store;
pub mod sweep;
pub mod table;
pub mod tone;
pub mod window;

pub use audio::{DeviceInfo, Direction, list_devices};
pub use config::EngineConfig;
pub use engine::{Engine, Notice};
pub use fft::FftFrame;
pub use frequency_map::FrequencyMap;
pub use mode::MeasurementMode;
pub use table::ImportReport;
pub use window::WindowFunction;

/// State published to the presentation layer on every poll.
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSnapshot {
    /// Current tone / measurement frequency in Hz.
    pub frequency_hz: f64,
    /// Base-10 log of `frequency_hz`.
    pub log_freq: f64,
    /// Bucket of the current frequency, `None` outside the audible range.
    pub bucket: Option<usize>,
    /// Latest smoothed input level in dBFS.
    pub level_db: f32,
    pub mode: MeasurementMode,
    pub recording: bool,
    pub lock_frequency: bool,
    pub sweeping: bool,
    /// Whether manual interaction records.
    pub recording_enabled: bool,
    pub fft_enabled: bool,
    pub fft_window: WindowFunction,
    /// 0.0 ..= 1.0
    pub sweep_progress: f32,
    pub status: String,
    pub streams_running: bool,
    /// Stream errors reported since start.
    pub overruns: usize,
}
