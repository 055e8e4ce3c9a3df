//! # Level Meter Module
//!
//! Smoothed power level of the input signal in dBFS. Each input block is
//! reduced to its mean-square value and written into a circular buffer; the
//! level is the mean of that buffer on a log scale.
//!
//! Two buffers exist. The active one (about 125 ms) is used while a
//! measurement is being captured; the idle one (a fifth of that) gives faster
//! feedback otherwise. Nothing here allocates after construction.

use crate::config::EngineConfig;

/// Added to the mean square before taking the log.
pub const LEVEL_EPSILON: f64 = 1e-12;

/// Converts a mean-square value to dBFS.
pub fn mean_square_to_db(mean_square: f64) -> f32 {
    (10.0 * (mean_square + LEVEL_EPSILON).log10()) as f32
}

/// Mean of the squared samples, accumulated in double precision.
pub fn mean_square(block: &[f32]) -> f64 {
    if block.is_empty() {
        return 0.0;
    }
    block.iter().map(|&s| s as f64 * s as f64).sum::<f64>() / block.len() as f64
}

/// Fixed-length ring of block mean-square values.
#[derive(Debug, Clone)]
pub struct RollingLevelBuffer {
    values: Vec<f64>,
    cursor: usize,
}

impl RollingLevelBuffer {
    /// Creates a buffer of `len` slots (at least one), all zero.
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![0.0; len.max(1)],
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Overwrites the oldest slot.
    pub fn push(&mut self, mean_square: f64) {
        self.values[self.cursor] = mean_square;
        self.cursor = (self.cursor + 1) % self.values.len();
    }

    pub fn fill(&mut self, mean_square: f64) {
        self.values.fill(mean_square);
    }

    pub fn mean(&self) -> f64 {
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub fn level_db(&self) -> f32 {
        mean_square_to_db(self.mean())
    }
}

/// Active/idle pair of level buffers.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    active: RollingLevelBuffer,
    idle: RollingLevelBuffer,
    capturing: bool,
}

impl LevelMeter {
    pub fn new(active_len: usize, idle_len: usize) -> Self {
        Self {
            active: RollingLevelBuffer::new(active_len),
            idle: RollingLevelBuffer::new(idle_len),
            capturing: false,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.active_buffer_len(), config.idle_buffer_len())
    }

    /// Feeds one block and returns the level of the buffer in use.
    ///
    /// `capturing` is `recording || lock_frequency` and selects the active
    /// buffer. When capturing starts, the active buffer is primed with the idle
    /// mean so readings from an earlier capture cannot leak into this one.
    ///
    /// # Arguments
    /// * `block` - mono samples of one input block
    /// * `capturing` - whether a measurement is being recorded
    pub fn ingest(&mut self, block: &[f32], capturing: bool) -> f32 {
        if capturing && !self.capturing {
            self.active.fill(self.idle.mean());
        }
        self.capturing = capturing;

        if !block.is_empty() {
            let value = mean_square(block);
            self.buffer_in_use_mut().push(value);
        }
        self.current_level()
    }

    /// Level of the buffer selected by the last [`LevelMeter::ingest`].
    pub fn current_level(&self) -> f32 {
        if self.capturing {
            self.active.level_db()
        } else {
            self.idle.level_db()
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn active(&self) -> &RollingLevelBuffer {
        &self.active
    }

    pub fn idle(&self) -> &RollingLevelBuffer {
        &self.idle
    }

    fn buffer_in_use_mut(&mut self) -> &mut RollingLevelBuffer {
        if self.capturing {
            &mut self.active
        } else {
            &mut self.idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_buffer_matches_formula() {
        let mut buffer = RollingLevelBuffer::new(4);
        for _ in 0..4 {
            buffer.push(0.01);
        }
        assert!((buffer.level_db() - (-20.0)).abs() < 1e-4);

        let m = 0.0375;
        buffer.fill(m);
        let expected = 10.0 * (m + 1e-12f64).log10();
        assert!((buffer.level_db() as f64 - expected).abs() < 1e-5);
    }

    #[test]
    fn silence_is_bounded_by_epsilon() {
        let buffer = RollingLevelBuffer::new(8);
        assert!((buffer.level_db() - (-120.0)).abs() < 1e-3);
    }

    #[test]
    fn push_wraps_around() {
        let mut buffer = RollingLevelBuffer::new(2);
        buffer.push(1.0);
        buffer.push(1.0);
        buffer.push(0.0);
        assert!((buffer.mean() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn full_scale_square_wave_reads_zero_db() {
        let block: Vec<f32> = (0..128).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let mut meter = LevelMeter::new(4, 2);
        let mut level = 0.0;
        for _ in 0..4 {
            level = meter.ingest(&block, false);
        }
        assert!(level.abs() < 1e-4);
    }

    #[test]
    fn capture_selects_active_buffer() {
        let loud = vec![0.5f32; 128];
        let quiet = vec![0.0f32; 128];
        let mut meter = LevelMeter::new(10, 2);

        meter.ingest(&loud, false);
        meter.ingest(&loud, false);
        // entering capture primes the active buffer with the idle mean
        let level = meter.ingest(&loud, true);
        assert!(meter.is_capturing());
        assert!((level - mean_square_to_db(0.25)).abs() < 1e-4);

        // one quiet block only moves the long buffer by a tenth
        let level = meter.ingest(&quiet, true);
        assert!((level - mean_square_to_db(0.225)).abs() < 1e-4);

        // idle buffer was untouched while capturing
        assert!((meter.idle().mean() - 0.25).abs() < 1e-12);
    }
}
