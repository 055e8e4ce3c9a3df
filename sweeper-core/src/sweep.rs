//! # Sweep Controller Module
//!
//! Automated traversal of the audible range. The sweep is a state machine
//! advanced by an external driver: each call to [`SweepController::step`]
//! either waits for the current settle period to elapse or commits the latest
//! level reading and moves to the next frequency. The cancel flag is polled
//! once per call.
//!
//! Steps are spaced linearly in log frequency, `sub_steps` per bucket, each
//! placed at the centre of its slice so every bucket is hit exactly
//! `sub_steps` times. Repeated writes to a bucket overwrite each other.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::frequency_map::FrequencyMap;

/// Effects the sweep needs from the engine.
pub trait SweepTarget {
    /// Moves the tone (and the measurement point) to `log_freq`.
    fn set_log_frequency(&mut self, log_freq: f64);
    fn set_tone(&mut self, on: bool);
    fn set_recording(&mut self, on: bool);
    /// Most recent level meter reading.
    fn current_level(&self) -> f32;
    /// Stores `level_db` at the bucket of `log_freq`. Returns false if the
    /// frequency has no bucket.
    fn commit_level(&mut self, log_freq: f64, level_db: f32) -> bool;
}

/// Progress of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    Idle,
    Running { step: usize, total: usize },
    Completed,
    Aborted,
}

/// Frequencies and timing of a sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPlan {
    log_min: f64,
    log_max: f64,
    total_steps: usize,
    settle: Duration,
    first_settle: Duration,
}

impl SweepPlan {
    /// # Arguments
    /// * `map` - provides the audible range and bucket count
    /// * `sub_steps` - steps per bucket
    /// * `settle` - wait after every frequency change
    /// * `first_settle` - wait after the tone starts, long enough to flush the
    ///   level buffer
    pub fn new(map: &FrequencyMap, sub_steps: usize, settle: Duration, first_settle: Duration) -> Self {
        let (log_min, log_max) = map.audible_log_range();
        Self {
            log_min,
            log_max,
            total_steps: map.bucket_count() * sub_steps.max(1),
            settle,
            first_settle,
        }
    }

    pub fn from_config(config: &EngineConfig, map: &FrequencyMap) -> Self {
        let settle = config.settle_duration();
        let first_settle = config
            .active_buffer_duration()
            .mul_f64(config.settle_factor)
            .max(settle);
        Self::new(map, config.sweep_sub_steps, settle, first_settle)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Expected run time without aborts.
    pub fn duration(&self) -> Duration {
        self.first_settle + self.settle * (self.total_steps.saturating_sub(1)) as u32
    }

    /// Log frequency of step `k`, at the centre of its slice.
    pub fn log_freq_at(&self, step: usize) -> f64 {
        self.log_min + (step as f64 + 0.5) / self.total_steps as f64 * (self.log_max - self.log_min)
    }
}

/// Drives one sweep at a time.
#[derive(Debug)]
pub struct SweepController {
    plan: SweepPlan,
    step: usize,
    deadline: Instant,
    status: SweepStatus,
    cancel: Arc<AtomicBool>,
}

impl SweepController {
    pub fn new(plan: SweepPlan) -> Self {
        Self {
            plan,
            step: 0,
            deadline: Instant::now(),
            status: SweepStatus::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn plan(&self) -> &SweepPlan {
        &self.plan
    }

    /// Shared abort flag; setting it stops the sweep at the next step.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn abort(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn status(&self) -> SweepStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, SweepStatus::Running { .. })
    }

    /// Starts a sweep at the lowest step.
    pub fn begin<T: SweepTarget>(&mut self, target: &mut T, now: Instant) {
        self.cancel.store(false, Ordering::Release);
        self.step = 0;
        target.set_recording(true);
        target.set_log_frequency(self.plan.log_freq_at(0));
        target.set_tone(true);
        self.deadline = now + self.plan.first_settle;
        self.status = SweepStatus::Running {
            step: 0,
            total: self.plan.total_steps,
        };
        log::info!(
            "[SWEEP] Started: {} steps, {:.1} ms settle, ~{:.1} s",
            self.plan.total_steps,
            self.plan.settle.as_secs_f64() * 1000.0,
            self.plan.duration().as_secs_f64()
        );
    }

    /// Advances the sweep if the current settle period has elapsed.
    ///
    /// Returns the status after this call. Calling it on a finished sweep is a
    /// no-op.
    pub fn step<T: SweepTarget>(&mut self, target: &mut T, now: Instant) -> SweepStatus {
        if !self.is_running() {
            return self.status;
        }
        if self.cancel.load(Ordering::Acquire) {
            log::info!("[SWEEP] Aborted at step {}/{}", self.step, self.plan.total_steps);
            return self.finish(target, SweepStatus::Aborted);
        }
        if now < self.deadline {
            return self.status;
        }

        let log_freq = self.plan.log_freq_at(self.step);
        let level = target.current_level();
        if !target.commit_level(log_freq, level) {
            log::warn!("[SWEEP] Step {} at {:.4} has no bucket", self.step, log_freq);
        }

        self.step += 1;
        if self.step >= self.plan.total_steps {
            log::info!("[SWEEP] Completed");
            return self.finish(target, SweepStatus::Completed);
        }

        target.set_log_frequency(self.plan.log_freq_at(self.step));
        self.deadline = now + self.plan.settle;
        self.status = SweepStatus::Running {
            step: self.step,
            total: self.plan.total_steps,
        };
        self.status
    }

    /// Fraction of steps done, 1.0 once completed.
    pub fn progress(&self) -> f32 {
        match self.status {
            SweepStatus::Running { step, total } => step as f32 / total.max(1) as f32,
            SweepStatus::Completed => 1.0,
            SweepStatus::Idle | SweepStatus::Aborted => 0.0,
        }
    }

    pub fn status_text(&self) -> String {
        match self.status {
            SweepStatus::Idle => String::from("ready"),
            SweepStatus::Running { step, total } => {
                let hz = 10f64.powf(self.plan.log_freq_at(step));
                format!("sweeping {:.0} Hz ({}/{})", hz, step, total)
            }
            SweepStatus::Completed => String::from("sweep completed"),
            SweepStatus::Aborted => String::from("sweep aborted"),
        }
    }

    fn finish<T: SweepTarget>(&mut self, target: &mut T, status: SweepStatus) -> SweepStatus {
        target.set_tone(false);
        target.set_recording(false);
        self.cancel.store(false, Ordering::Release);
        self.status = status;
        status
    }
}
