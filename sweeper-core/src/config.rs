//! # Engine Configuration Module
//!
//! Every tunable of the measurement engine lives in [`EngineConfig`]. The
//! struct is serializable so a front end can keep a JSON settings file next to
//! its measurement tables and hand it back on the next start.
//!
//! ## Features
//! - Defaults matching the classic 44.1 kHz / 128-sample measurement setup
//! - Derived sizes (level buffer lengths, settle time, FFT window)
//! - Validation of numeric ranges before any table or stream is built
//! - JSON load/save

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Duration;

use crate::window::WindowFunction;

/// Tunable parameters of the measurement engine.
///
/// Missing fields in a JSON file fall back to the defaults, so older settings
/// files keep loading after new parameters are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Stream sample rate in Hz, shared by input and output.
    pub sample_rate: u32,
    /// Frames per input callback block.
    pub input_block_size: usize,
    /// Frames per output callback block.
    pub output_block_size: usize,
    /// Number of measurement buckets across the audible range.
    pub bucket_count: usize,
    /// Number of independent measurement tracks.
    pub track_count: usize,
    /// Lowest frequency shown on the display axis.
    pub display_min_hz: f64,
    /// Highest frequency shown on the display axis.
    pub display_max_hz: f64,
    /// Lowest frequency covered by the buckets.
    pub audible_min_hz: f64,
    /// Highest frequency covered by the buckets.
    pub audible_max_hz: f64,
    /// Tone frequency selected at startup.
    pub initial_hz: f64,
    /// Level every track is initialized and reset to.
    pub level_floor_db: f32,
    /// Highest level accepted into a track.
    pub level_ceiling_db: f32,
    /// Time constant of the active level buffer in milliseconds.
    pub active_window_ms: f64,
    /// The idle level buffer is this many times shorter than the active one.
    pub idle_divisor: usize,
    /// Delay between pressing and the start of manual recording.
    pub arm_delay_ms: u64,
    /// Sweep sub-steps per bucket.
    pub sweep_sub_steps: usize,
    /// Settle time as a multiple of the active buffer time constant.
    pub settle_factor: f64,
    /// FFT window length as a multiple of the input block size.
    pub fft_window_multiple: usize,
    /// Window function applied before the FFT.
    pub fft_window: WindowFunction,
    /// Whether manual interaction records into the current track.
    pub recording_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            input_block_size: 128,
            output_block_size: 512,
            bucket_count: 256,
            track_count: 8,
            display_min_hz: 10.0,
            display_max_hz: 40000.0,
            audible_min_hz: 20.0,
            audible_max_hz: 20000.0,
            initial_hz: 442.0,
            level_floor_db: -90.0,
            level_ceiling_db: 0.0,
            active_window_ms: 125.0,
            idle_divisor: 5,
            arm_delay_ms: 200,
            sweep_sub_steps: 4,
            settle_factor: 1.5,
            fft_window_multiple: 16,
            fft_window: WindowFunction::Hann,
            recording_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Checks that every derived table and stream can be built from this
    /// configuration.
    ///
    /// A failure here is fatal: the engine refuses to start.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow!("sample rate must be positive"));
        }
        if self.input_block_size == 0 || self.output_block_size == 0 {
            return Err(anyhow!("block sizes must be positive"));
        }
        if self.bucket_count == 0 || self.track_count == 0 {
            return Err(anyhow!("bucket and track counts must be positive"));
        }
        if !(self.display_min_hz > 0.0 && self.display_min_hz < self.display_max_hz) {
            return Err(anyhow!(
                "invalid display range {} Hz .. {} Hz",
                self.display_min_hz,
                self.display_max_hz
            ));
        }
        if !(self.audible_min_hz < self.audible_max_hz
            && self.audible_min_hz >= self.display_min_hz
            && self.audible_max_hz <= self.display_max_hz)
        {
            return Err(anyhow!(
                "audible range {} Hz .. {} Hz must lie inside the display range",
                self.audible_min_hz,
                self.audible_max_hz
            ));
        }
        if !(self.level_floor_db < self.level_ceiling_db) {
            return Err(anyhow!("level floor must be below the ceiling"));
        }
        if !(self.active_window_ms > 0.0) || self.idle_divisor == 0 {
            return Err(anyhow!("level window must be positive"));
        }
        if self.sweep_sub_steps == 0 || !(self.settle_factor > 0.0) {
            return Err(anyhow!("sweep sub-steps and settle factor must be positive"));
        }
        if !self.fft_window_size().is_power_of_two() {
            return Err(anyhow!(
                "FFT window of {} samples is not a power of two",
                self.fft_window_size()
            ));
        }
        Ok(())
    }

    /// Duration of one input block.
    pub fn input_block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.input_block_size as f64 / self.sample_rate as f64)
    }

    /// Number of blocks held by the active level buffer (about 125 ms of audio).
    pub fn active_buffer_len(&self) -> usize {
        let blocks = self.active_window_ms / 1000.0 * self.sample_rate as f64
            / self.input_block_size as f64;
        (blocks.round() as usize).max(1)
    }

    /// Number of blocks held by the idle level buffer.
    pub fn idle_buffer_len(&self) -> usize {
        (self.active_buffer_len() / self.idle_divisor).max(1)
    }

    /// Time covered by the active level buffer.
    pub fn active_buffer_duration(&self) -> Duration {
        self.input_block_duration() * self.active_buffer_len() as u32
    }

    /// Wait between two sweep sub-steps.
    pub fn settle_duration(&self) -> Duration {
        self.active_buffer_duration()
            .mul_f64(self.settle_factor / self.sweep_sub_steps as f64)
    }

    pub fn arm_delay(&self) -> Duration {
        Duration::from_millis(self.arm_delay_ms)
    }

    /// FFT window length in samples.
    pub fn fft_window_size(&self) -> usize {
        self.input_block_size * self.fft_window_multiple
    }

    /// Reads a configuration from JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_reader(reader).context("malformed engine configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Writes this configuration as pretty-printed JSON.
    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self).context("failed to serialize configuration")
    }

    /// Loads and validates a configuration file.
    ///
    /// # Arguments
    /// * `path` - JSON file previously written by [`EngineConfig::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open config file {}", path.display()))?;
        let config = Self::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to load config file {}", path.display()))?;
        log::info!("[CONFIG] Loaded settings from {}", path.display());
        Ok(config)
    }

    /// Saves the configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("failed to create config file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        self.to_writer(&mut writer)?;
        writer.flush()?;
        log::info!("[CONFIG] Saved settings to {}", path.display());
        Ok(())
    }
}
