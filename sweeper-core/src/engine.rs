//! # Engine Module
//!
//! The owned context of a measurement session and its control surface.
//!
//! The engine never pushes anything to the presentation layer. A front end
//! calls the control methods in response to user input, calls
//! [`Engine::tick`] on a timer (about every 16 ms) to advance time-based
//! transitions and the sweep, and reads [`Engine::snapshot`], the track
//! arrays, the latest FFT frame and the pending [`Notice`]s.

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use crate::MeasurementSnapshot;
use crate::audio::AudioIOBridge;
use crate::config::EngineConfig;
use crate::fft::{FftFrame, FftOutput, SpectrumAnalyzer};
use crate::frequency_map::FrequencyMap;
use crate::mode::ModeMachine;
use crate::processor::{InputProcessor, OutputRenderer, Shared};
use crate::store::TrackExport;
use crate::sweep::{SweepController, SweepPlan, SweepStatus, SweepTarget};
use crate::table::{self, ImportReport};
use crate::window::WindowFunction;

/// Non-fatal events for the front end to show.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// Opening devices failed; the engine runs without streams.
    DeviceError(String),
    /// A running stream reported an error; measurement continues.
    StreamError(String),
    SweepCompleted,
    SweepAborted,
    /// Some rows of an imported table were rejected.
    ImportSkipped { applied: usize, skipped: usize },
    Info(String),
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceError(msg) => write!(f, "audio device error: {}", msg),
            Self::StreamError(msg) => write!(f, "audio stream error: {}", msg),
            Self::SweepCompleted => f.write_str("sweep completed"),
            Self::SweepAborted => f.write_str("sweep aborted"),
            Self::ImportSkipped { applied, skipped } => {
                write!(f, "imported {} rows, skipped {} invalid rows", applied, skipped)
            }
            Self::Info(msg) => f.write_str(msg),
        }
    }
}

/// Sweep effects routed to the shared state. Readings go to the track that
/// was current when the sweep started.
struct SweepPort<'a> {
    shared: &'a Shared,
    track: usize,
}

impl SweepTarget for SweepPort<'_> {
    fn set_log_frequency(&mut self, log_freq: f64) {
        self.shared.set_log_freq(log_freq);
    }

    fn set_tone(&mut self, on: bool) {
        self.shared.set_tone_enabled(on);
    }

    fn set_recording(&mut self, on: bool) {
        // the sweep commits its own readings
        self.shared.set_capture(on, false);
    }

    fn current_level(&self) -> f32 {
        self.shared.level_db()
    }

    fn commit_level(&mut self, log_freq: f64, level_db: f32) -> bool {
        match self.shared.map().log_to_bucket(log_freq) {
            Some(bucket) => self.shared.store().write_level(self.track, bucket, level_db),
            None => false,
        }
    }
}

/// A measurement session.
pub struct Engine {
    config: EngineConfig,
    shared: Arc<Shared>,
    mode: ModeMachine,
    sweep: SweepController,
    bridge: Option<AudioIOBridge>,
    analyzer: SpectrumAnalyzer,
    fft_output: FftOutput,
    display_map: FrequencyMap,
    /// Upper bound for user-set frequencies: the display edge or Nyquist.
    log_freq_max: f64,
    sweep_track: usize,
    /// FFT sequence already shown before the last enable.
    fft_seen: u64,
    notice_tx: Sender<Notice>,
    notice_rx: Receiver<Notice>,
    status: String,
}

impl Engine {
    /// Builds the engine without opening any audio device.
    ///
    /// Fails if the configuration is invalid or the analyzer thread cannot
    /// be started.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate().context("invalid engine configuration")?;

        let shared = Arc::new(Shared::new(&config));
        let analyzer = SpectrumAnalyzer::spawn(shared.clone())?;
        let fft_output = analyzer.output();
        let display_map = *shared.map();
        let sweep = SweepController::new(SweepPlan::from_config(&config, &display_map));
        let (notice_tx, notice_rx) = unbounded();
        let log_freq_max = display_map
            .log_range()
            .1
            .min((config.sample_rate as f64 / 2.0).log10());

        log::info!(
            "[ENGINE] {} tracks x {} buckets, {} Hz, {} sweep steps",
            config.track_count,
            config.bucket_count,
            config.sample_rate,
            sweep.plan().total_steps()
        );

        Ok(Self {
            mode: ModeMachine::new(config.arm_delay(), config.recording_enabled),
            config,
            shared,
            sweep,
            bridge: None,
            analyzer,
            fft_output,
            display_map,
            log_freq_max,
            sweep_track: 0,
            fft_seen: 0,
            notice_tx,
            notice_rx,
            status: String::from("no audio"),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Opens the default input and output devices.
    pub fn start_audio(&mut self) -> Result<()> {
        self.select_audio_devices(None, None)
    }

    /// Replaces the running streams with a new device pair.
    ///
    /// A running sweep is aborted and the old streams are closed after the
    /// tone has ramped off. On failure the engine is left without streams and
    /// a [`Notice::DeviceError`] is posted as well as returned.
    pub fn select_audio_devices(&mut self, input: Option<&str>, output: Option<&str>) -> Result<()> {
        if self.mode.sweeping() {
            self.sweep.abort();
            self.advance_sweep(Instant::now());
        }
        if let Some(mut bridge) = self.bridge.take() {
            bridge.close();
        }

        match AudioIOBridge::open(
            self.shared.clone(),
            &self.config,
            input,
            output,
            self.notice_tx.clone(),
        ) {
            Ok(bridge) => {
                self.status = format!("{} / {}", bridge.input_name(), bridge.output_name());
                self.post(Notice::Info(format!("audio: {}", self.status)));
                self.bridge = Some(bridge);
                self.apply_mode();
                Ok(())
            }
            Err(e) => {
                log::error!("[ENGINE] Audio unavailable: {:#}", e);
                self.status = String::from("no audio");
                self.post(Notice::DeviceError(format!("{:#}", e)));
                Err(e)
            }
        }
    }

    pub fn streams_running(&self) -> bool {
        self.bridge.as_ref().is_some_and(AudioIOBridge::is_running)
    }

    /// Callback processors bound to this engine, for driving it without a
    /// device (tests, offline processing).
    pub fn processors(&self) -> (InputProcessor, OutputRenderer) {
        (
            InputProcessor::new(self.shared.clone(), &self.config),
            OutputRenderer::new(self.shared.clone(), &self.config),
        )
    }

    /// Sets the tone frequency unless the frequency is locked or sweeping.
    ///
    /// The value is clamped to the display range and to Nyquist.
    pub fn set_manual_frequency(&mut self, hz: f64) -> bool {
        if !self.mode.frequency_follows_user() || !(hz > 0.0) {
            return false;
        }
        self.shared.set_log_freq(self.clamp_user_log(hz.log10()));
        true
    }

    /// Moves the frequency by a fraction of the display's log range,
    /// positive upwards.
    pub fn scroll_frequency(&mut self, fraction: f64) -> bool {
        if !self.mode.frequency_follows_user() || !fraction.is_finite() {
            return false;
        }
        let (log_min, log_max) = self.display_map.log_range();
        let target = self.shared.log_freq() + fraction * (log_max - log_min);
        self.shared.set_log_freq(self.clamp_user_log(target));
        true
    }

    fn clamp_user_log(&self, log_freq: f64) -> f64 {
        self.display_map.clamp_log(log_freq).min(self.log_freq_max)
    }

    pub fn begin_interaction(&mut self, now: Instant) -> bool {
        let changed = self.mode.begin_interaction(now);
        self.apply_mode();
        changed
    }

    pub fn end_interaction(&mut self) -> bool {
        let changed = self.mode.end_interaction();
        self.apply_mode();
        changed
    }

    pub fn pin_frequency(&mut self) -> bool {
        let changed = self.mode.pin();
        self.apply_mode();
        changed
    }

    pub fn unpin_frequency(&mut self) -> bool {
        let changed = self.mode.unpin();
        self.apply_mode();
        changed
    }

    /// Starts a sweep of the audible range into the current track.
    ///
    /// Selecting other tracks while it runs does not move the sweep.
    pub fn start_sweep(&mut self, now: Instant) -> bool {
        if !self.mode.start_sweep() {
            return false;
        }
        self.sweep_track = self.shared.store().current_track();
        log::info!("[ENGINE] Sweeping into track {}", self.sweep_track + 1);
        let mut port = SweepPort {
            shared: &self.shared,
            track: self.sweep_track,
        };
        self.sweep.begin(&mut port, now);
        true
    }

    /// Requests the running sweep to stop at its next step.
    pub fn abort_sweep(&self) {
        if self.sweep.is_running() {
            self.sweep.abort();
        }
    }

    /// Flag that aborts the sweep when set, usable from other threads.
    pub fn sweep_cancel_handle(&self) -> Arc<AtomicBool> {
        self.sweep.cancel_handle()
    }

    pub fn select_track(&mut self, track: usize, extend: bool) -> bool {
        self.shared.store().select_track(track, extend)
    }

    pub fn reset_track(&mut self, track: usize) -> bool {
        self.shared.store().reset_track(track)
    }

    /// Returns the new setting.
    pub fn toggle_recording_enabled(&mut self, now: Instant) -> bool {
        let enabled = self.mode.toggle_recording_enabled(now);
        self.apply_mode();
        enabled
    }

    /// Returns the new setting.
    pub fn toggle_fft(&mut self) -> bool {
        let enabled = !self.shared.fft_enabled();
        if enabled {
            self.fft_seen = self.fft_seen.max(self.fft_output.read().sequence);
        }
        self.shared.set_fft_enabled(enabled);
        log::info!("[FFT] {}", if enabled { "Enabled" } else { "Disabled" });
        enabled
    }

    pub fn select_fft_window(&mut self, name: &str) -> Result<WindowFunction> {
        let window: WindowFunction = name.parse()?;
        self.shared.set_fft_window(window);
        Ok(window)
    }

    /// Advances the arm delay and the sweep.
    pub fn tick(&mut self, now: Instant) {
        if self.mode.tick(now) {
            self.apply_mode();
        }
        if self.mode.sweeping() {
            self.advance_sweep(now);
        }
    }

    fn advance_sweep(&mut self, now: Instant) {
        let mut port = SweepPort {
            shared: &self.shared,
            track: self.sweep_track,
        };
        let status = self.sweep.step(&mut port, now);
        let notice = match status {
            SweepStatus::Completed => Notice::SweepCompleted,
            SweepStatus::Aborted => Notice::SweepAborted,
            _ => return,
        };
        self.mode.finish_sweep();
        self.apply_mode();
        self.status = self.sweep.status_text();
        self.post(notice);
    }

    /// Pushes the mode's tone and capture flags to the callbacks. While
    /// sweeping the sweep controller owns them.
    fn apply_mode(&self) {
        if self.mode.sweeping() {
            return;
        }
        self.shared.set_tone_enabled(self.mode.tone_on());
        self.shared
            .set_capture(self.mode.recording(), self.mode.callback_writes());
    }

    pub fn snapshot(&self) -> MeasurementSnapshot {
        let log_freq = self.shared.log_freq();
        let status = if self.sweep.is_running() {
            self.sweep.status_text()
        } else {
            self.status.clone()
        };
        MeasurementSnapshot {
            frequency_hz: 10f64.powf(log_freq),
            log_freq,
            bucket: self.display_map.log_to_bucket(log_freq),
            level_db: self.shared.level_db(),
            mode: self.mode.mode(),
            recording: self.mode.recording(),
            lock_frequency: self.mode.lock_frequency(),
            sweeping: self.mode.sweeping(),
            recording_enabled: self.mode.recording_enabled(),
            fft_enabled: self.shared.fft_enabled(),
            fft_window: self.shared.fft_window(),
            sweep_progress: self.sweep.progress(),
            status,
            streams_running: self.streams_running(),
            overruns: self.shared.overruns(),
        }
    }

    /// Resize event of the display.
    pub fn set_display_extent(&mut self, width: f64, height: f64) {
        self.display_map.set_extent(width, height);
        self.shared.set_extent(width, height);
    }

    /// Map with the current display extent, for drawing.
    pub fn frequency_map(&self) -> &FrequencyMap {
        &self.display_map
    }

    pub fn track_levels(&self, track: usize) -> Option<Vec<f32>> {
        self.shared.store().track_levels(track)
    }

    pub fn visible_tracks(&self) -> Vec<usize> {
        self.shared.store().visible_tracks()
    }

    pub fn current_track(&self) -> usize {
        self.shared.store().current_track()
    }

    /// Whether track data changed since the last call.
    pub fn take_modified(&self) -> bool {
        self.shared.store().take_modified()
    }

    pub fn export_track(&self, track: usize) -> Option<TrackExport<'_>> {
        self.shared.store().export_track(track, &self.display_map)
    }

    /// Writes a track to a text table file.
    pub fn export_track_to<P: AsRef<Path>>(&self, path: P, track: usize) -> Result<()> {
        let path = path.as_ref();
        let rows = self
            .export_track(track)
            .ok_or_else(|| anyhow!("no track {}", track))?;
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        table::write_table(BufWriter::new(file), &format!("track {}", track + 1), rows)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("[ENGINE] Exported track {} to {}", track + 1, path.display());
        Ok(())
    }

    /// Loads a text table into `track`, overwriting the buckets it names.
    pub fn import_table<R: Read>(&mut self, reader: R, track: usize) -> Result<ImportReport> {
        let store = self.shared.store();
        if track >= store.track_count() {
            return Err(anyhow!("no track {}", track));
        }
        let (levels, report) = table::read_table(
            reader,
            &self.display_map,
            self.config.level_floor_db,
            self.config.level_ceiling_db,
        )?;
        for (bucket, db) in levels {
            store.write_level(track, bucket, db);
        }
        if report.skipped > 0 {
            log::warn!("[ENGINE] Import skipped {} invalid rows", report.skipped);
            self.post(Notice::ImportSkipped {
                applied: report.applied,
                skipped: report.skipped,
            });
        }
        Ok(report)
    }

    pub fn import_track_from<P: AsRef<Path>>(&mut self, path: P, track: usize) -> Result<ImportReport> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let report = self
            .import_table(BufReader::new(file), track)
            .with_context(|| format!("failed to import {}", path.display()))?;
        log::info!(
            "[ENGINE] Imported {} rows from {} into track {}",
            report.applied,
            path.display(),
            track + 1
        );
        Ok(report)
    }

    /// Latest frame analyzed since the FFT was last enabled.
    pub fn fft_frame(&self) -> Option<FftFrame> {
        if !self.shared.fft_enabled() {
            return None;
        }
        Some(self.fft_output.read()).filter(|frame| frame.sequence > self.fft_seen)
    }

    pub fn drain_notices(&self) -> Vec<Notice> {
        self.notice_rx.try_iter().collect()
    }

    fn post(&self, notice: Notice) {
        let _ = self.notice_tx.send(notice);
    }

    /// Stops the sweep, ramps the tone off and closes every stream and thread.
    pub fn shutdown(&mut self) {
        if self.mode.sweeping() {
            self.sweep.abort();
            self.advance_sweep(Instant::now());
        }
        self.mode.end_interaction();
        self.mode.unpin();
        self.apply_mode();
        if let Some(mut bridge) = self.bridge.take() {
            bridge.close();
        }
        self.analyzer.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
