//! # Frequency Map Module
//!
//! Pure conversions between linear frequency, base-10 log frequency, bucket
//! index and display coordinates. Every other component asks this module
//! instead of doing its own scale math.
//!
//! ## Scales
//! - Buckets split the audible range (20 Hz .. 20 kHz) into equal log steps
//! - Pixels span the wider display range (10 Hz .. 40 kHz)
//! - Vertical pixels span the display dB range, 0 at the top

use crate::config::EngineConfig;

/// Frequency grid lines: (frequency, bold, label).
pub const FREQUENCY_MARKERS: &[(f64, bool, &str)] = &[
    (10.0, false, ""),
    (20.0, true, "20Hz"),
    (30.0, false, ""),
    (40.0, false, ""),
    (50.0, false, ""),
    (60.0, false, ""),
    (70.0, false, ""),
    (80.0, false, ""),
    (90.0, false, ""),
    (100.0, true, "100Hz"),
    (200.0, false, ""),
    (300.0, false, ""),
    (400.0, false, ""),
    (500.0, false, ""),
    (600.0, false, ""),
    (700.0, false, ""),
    (800.0, false, ""),
    (900.0, false, ""),
    (1000.0, true, "1kHz"),
    (2000.0, false, ""),
    (3000.0, false, ""),
    (4000.0, false, ""),
    (5000.0, false, ""),
    (6000.0, false, ""),
    (7000.0, false, ""),
    (8000.0, false, ""),
    (9000.0, false, ""),
    (10000.0, true, "10kHz"),
    (20000.0, true, "20kHz"),
    (40000.0, true, ""),
];

/// Level grid lines: (dB, bold).
pub const DB_MARKERS: &[(f32, bool)] = &[
    (10.0, false),
    (0.0, true),
    (-10.0, false),
    (-20.0, false),
    (-30.0, false),
    (-40.0, false),
    (-50.0, false),
    (-60.0, false),
    (-70.0, false),
    (-80.0, false),
    (-90.0, true),
];

/// Conversions between frequency, bucket and display coordinates.
///
/// The bucket scale is fixed at construction. The pixel scale depends on the
/// display extent and is only recomputed by [`FrequencyMap::set_extent`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyMap {
    log_min: f64,
    log_max: f64,
    log_min_audible: f64,
    log_max_audible: f64,
    bucket_count: usize,
    bucket_scale: f64,
    width: f64,
    height: f64,
    pixel_scale: f64,
    db_min: f32,
    db_max: f32,
}

impl FrequencyMap {
    /// Builds the map for a validated configuration with a 1×1 display.
    pub fn new(config: &EngineConfig) -> Self {
        let log_min_audible = config.audible_min_hz.log10();
        let log_max_audible = config.audible_max_hz.log10();
        let mut map = Self {
            log_min: config.display_min_hz.log10(),
            log_max: config.display_max_hz.log10(),
            log_min_audible,
            log_max_audible,
            bucket_count: config.bucket_count,
            bucket_scale: config.bucket_count as f64 / (log_max_audible - log_min_audible),
            width: 1.0,
            height: 1.0,
            pixel_scale: 1.0,
            db_min: config.level_floor_db,
            db_max: config.level_ceiling_db,
        };
        map.set_extent(1.0, 1.0);
        map
    }

    /// Resize event: recomputes the pixel scale for a new display extent.
    pub fn set_extent(&mut self, width: f64, height: f64) {
        self.width = width.max(1.0);
        self.height = height.max(1.0);
        self.pixel_scale = self.width / (self.log_max - self.log_min);
    }

    pub fn extent(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Display range as (log min, log max).
    pub fn log_range(&self) -> (f64, f64) {
        (self.log_min, self.log_max)
    }

    /// Audible range as (log min, log max).
    pub fn audible_log_range(&self) -> (f64, f64) {
        (self.log_min_audible, self.log_max_audible)
    }

    pub fn log_to_pixel(&self, log_freq: f64) -> f64 {
        self.pixel_scale * (log_freq - self.log_min)
    }

    pub fn pixel_to_log(&self, x: f64) -> f64 {
        x / self.pixel_scale + self.log_min
    }

    /// Bucket containing `log_freq`, or `None` outside the audible range.
    pub fn log_to_bucket(&self, log_freq: f64) -> Option<usize> {
        let index = (self.bucket_scale * (log_freq - self.log_min_audible)).floor();
        if index.is_finite() && index >= 0.0 && index < self.bucket_count as f64 {
            Some(index as usize)
        } else {
            None
        }
    }

    /// Log frequency at the centre of bucket `index`.
    pub fn bucket_to_log(&self, index: usize) -> f64 {
        (index as f64 + 0.5) / self.bucket_scale + self.log_min_audible
    }

    pub fn bucket_to_hz(&self, index: usize) -> f64 {
        10f64.powf(self.bucket_to_log(index))
    }

    pub fn hz_to_bucket(&self, hz: f64) -> Option<usize> {
        if hz > 0.0 {
            self.log_to_bucket(hz.log10())
        } else {
            None
        }
    }

    /// Clamps a log frequency into the display range.
    pub fn clamp_log(&self, log_freq: f64) -> f64 {
        log_freq.clamp(self.log_min, self.log_max)
    }

    pub fn is_audible_hz(&self, hz: f64) -> bool {
        hz > 0.0 && (self.log_min_audible..=self.log_max_audible).contains(&hz.log10())
    }

    /// Like [`FrequencyMap::hz_to_bucket`], but the upper audible bound
    /// itself lands in the last bucket.
    pub fn audible_bucket(&self, hz: f64) -> Option<usize> {
        if !self.is_audible_hz(hz) {
            return None;
        }
        let last = self.bucket_count.checked_sub(1)?;
        Some(self.hz_to_bucket(hz).unwrap_or(last).min(last))
    }

    /// Vertical coordinate of a level, 0 at the top of the display.
    pub fn db_to_pixel(&self, db: f32) -> f64 {
        let range = (self.db_max - self.db_min) as f64;
        self.height - self.height * (db - self.db_min) as f64 / range
    }

    /// Display dB range as (min, max).
    pub fn db_range(&self) -> (f32, f32) {
        (self.db_min, self.db_max)
    }
}
