//! # Callback Processors Module
//!
//! State shared between the control thread, the audio callbacks and the
//! analyzer worker, plus the two processors the callbacks own.
//!
//! ## Features
//! - [`Shared`]: atomics for everything crossing threads, no locks
//! - [`InputProcessor`]: level metering, recording writes and the FFT FIFO
//! - [`OutputRenderer`]: the tone generator, duplicated to every channel
//!
//! Both processors pre-allocate their scratch buffers; nothing on the
//! callback path allocates, locks or logs. They are plain structs so tests
//! and headless front ends can drive them without an audio device.

use atomic_float::{AtomicF32, AtomicF64};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::config::EngineConfig;
use crate::frequency_map::FrequencyMap;
use crate::level::LevelMeter;
use crate::store::SpectrumStore;
use crate::tone::{ToneGenerator, ToneState};
use crate::window::WindowFunction;

/// One-slot hand-off of a complete FFT window from the input callback to the
/// analyzer worker.
///
/// The callback fills the slot only while `ready` is clear and then sets it;
/// the worker copies the slot out and clears it. A window arriving while the
/// worker still holds the previous one is dropped.
#[derive(Debug)]
pub struct WindowHandoff {
    slot: Box<[AtomicF32]>,
    ready: AtomicBool,
    dropped: AtomicUsize,
}

impl WindowHandoff {
    pub fn new(size: usize) -> Self {
        Self {
            slot: (0..size).map(|_| AtomicF32::new(0.0)).collect(),
            ready: AtomicBool::new(false),
            dropped: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_empty()
    }

    /// Publishes `ring` in chronological order, `start` being the oldest
    /// sample. Returns false if the previous window was not consumed yet.
    pub fn offer(&self, ring: &[f32], start: usize) -> bool {
        if self.ready.load(Ordering::Acquire) || ring.len() != self.slot.len() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let (newer, older) = ring.split_at(start);
        for (slot, &sample) in self.slot.iter().zip(older.iter().chain(newer)) {
            slot.store(sample, Ordering::Relaxed);
        }
        self.ready.store(true, Ordering::Release);
        true
    }

    /// Copies a pending window into `out` and frees the slot.
    pub fn take(&self, out: &mut Vec<f32>) -> bool {
        if !self.ready.load(Ordering::Acquire) {
            return false;
        }
        out.clear();
        out.extend(self.slot.iter().map(|s| s.load(Ordering::Relaxed)));
        self.ready.store(false, Ordering::Release);
        true
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Windows dropped because the worker was busy.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Cross-thread engine state.
///
/// The control thread writes the targets (frequency, tone enable, capture
/// flags, FFT settings); the callbacks write the measurements (level, tone
/// state, overruns) and the store.
#[derive(Debug)]
pub struct Shared {
    sample_rate: u32,
    log_freq: AtomicF64,
    tone_enabled: AtomicBool,
    tone_state: AtomicU8,
    capturing: AtomicBool,
    callback_writes: AtomicBool,
    level_db: AtomicF32,
    fft_enabled: AtomicBool,
    fft_window: AtomicU8,
    extent_width: AtomicF64,
    extent_height: AtomicF64,
    overruns: AtomicUsize,
    handoff: WindowHandoff,
    store: SpectrumStore,
    map: FrequencyMap,
}

impl Shared {
    pub fn new(config: &EngineConfig) -> Self {
        let map = FrequencyMap::new(config);
        let initial = map.clamp_log(config.initial_hz.max(f64::MIN_POSITIVE).log10());
        Self {
            sample_rate: config.sample_rate,
            log_freq: AtomicF64::new(initial),
            tone_enabled: AtomicBool::new(false),
            tone_state: AtomicU8::new(ToneState::Off as u8),
            capturing: AtomicBool::new(false),
            callback_writes: AtomicBool::new(false),
            level_db: AtomicF32::new(config.level_floor_db),
            fft_enabled: AtomicBool::new(false),
            fft_window: AtomicU8::new(config.fft_window.index()),
            extent_width: AtomicF64::new(1.0),
            extent_height: AtomicF64::new(1.0),
            overruns: AtomicUsize::new(0),
            handoff: WindowHandoff::new(config.fft_window_size()),
            store: SpectrumStore::new(
                config.track_count,
                config.bucket_count,
                config.level_floor_db,
                config.level_ceiling_db,
            ),
            map,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn map(&self) -> &FrequencyMap {
        &self.map
    }

    pub fn store(&self) -> &SpectrumStore {
        &self.store
    }

    pub fn handoff(&self) -> &WindowHandoff {
        &self.handoff
    }

    pub fn log_freq(&self) -> f64 {
        self.log_freq.load(Ordering::Acquire)
    }

    pub fn set_log_freq(&self, log_freq: f64) {
        self.log_freq.store(log_freq, Ordering::Release);
    }

    pub fn tone_enabled(&self) -> bool {
        self.tone_enabled.load(Ordering::Acquire)
    }

    pub fn set_tone_enabled(&self, on: bool) {
        self.tone_enabled.store(on, Ordering::Release);
    }

    /// State last published by the output callback.
    pub fn tone_state(&self) -> ToneState {
        ToneState::from_u8(self.tone_state.load(Ordering::Acquire))
    }

    pub fn capturing(&self) -> bool {
        self.capturing.load(Ordering::Acquire)
    }

    /// Sets the capture flags together: `capturing` selects the active level
    /// buffer, `callback_writes` lets the input callback record into the store.
    pub fn set_capture(&self, capturing: bool, callback_writes: bool) {
        self.capturing.store(capturing, Ordering::Release);
        self.callback_writes.store(callback_writes, Ordering::Release);
    }

    pub fn callback_writes(&self) -> bool {
        self.callback_writes.load(Ordering::Acquire)
    }

    pub fn level_db(&self) -> f32 {
        self.level_db.load(Ordering::Acquire)
    }

    pub fn fft_enabled(&self) -> bool {
        self.fft_enabled.load(Ordering::Acquire)
    }

    pub fn set_fft_enabled(&self, on: bool) {
        self.fft_enabled.store(on, Ordering::Release);
    }

    pub fn fft_window(&self) -> WindowFunction {
        WindowFunction::from_index(self.fft_window.load(Ordering::Acquire))
    }

    pub fn set_fft_window(&self, window: WindowFunction) {
        self.fft_window.store(window.index(), Ordering::Release);
    }

    pub fn extent(&self) -> (f64, f64) {
        (
            self.extent_width.load(Ordering::Acquire),
            self.extent_height.load(Ordering::Acquire),
        )
    }

    pub fn set_extent(&self, width: f64, height: f64) {
        self.extent_width.store(width.max(1.0), Ordering::Release);
        self.extent_height.store(height.max(1.0), Ordering::Release);
    }

    pub fn overruns(&self) -> usize {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn record_overrun(&self) {
        self.overruns.fetch_add(1, Ordering::Relaxed);
    }
}

/// Ring of the most recent raw input samples for the analyzer.
#[derive(Debug)]
struct FftFifo {
    ring: Vec<f32>,
    write: usize,
    fresh: usize,
}

impl FftFifo {
    fn new(size: usize) -> Self {
        Self {
            ring: vec![0.0; size],
            write: 0,
            fresh: 0,
        }
    }

    fn push(&mut self, block: &[f32], handoff: &WindowHandoff) {
        if self.ring.is_empty() {
            return;
        }
        for &sample in block {
            self.ring[self.write] = sample;
            self.write = (self.write + 1) % self.ring.len();
            self.fresh += 1;
            if self.fresh == self.ring.len() {
                handoff.offer(&self.ring, self.write);
                self.fresh = 0;
            }
        }
    }

    fn reset(&mut self) {
        self.fresh = 0;
    }
}

fn process_mono(shared: &Shared, meter: &mut LevelMeter, fifo: &mut FftFifo, block: &[f32]) {
    let level = meter.ingest(block, shared.capturing());
    shared.level_db.store(level, Ordering::Release);

    if shared.callback_writes() {
        if let Some(bucket) = shared.map.log_to_bucket(shared.log_freq()) {
            shared.store.write_current(bucket, level);
        }
    }

    if shared.fft_enabled() {
        fifo.push(block, &shared.handoff);
    } else {
        fifo.reset();
    }
}

/// Work done by the input callback.
#[derive(Debug)]
pub struct InputProcessor {
    shared: Arc<Shared>,
    meter: LevelMeter,
    fifo: FftFifo,
    mono: Vec<f32>,
    block_size: usize,
}

impl InputProcessor {
    pub fn new(shared: Arc<Shared>, config: &EngineConfig) -> Self {
        let block_size = config.input_block_size.max(1);
        Self {
            fifo: FftFifo::new(shared.handoff().len()),
            shared,
            meter: LevelMeter::from_config(config),
            mono: vec![0.0; block_size],
            block_size,
        }
    }

    /// Entry point of the input stream callback.
    ///
    /// Takes channel 0 of interleaved frames and processes it in chunks of
    /// the configured block size.
    pub fn process_interleaved(&mut self, data: &[f32], channels: usize) {
        let channels = channels.max(1);
        let mut frames = data.chunks_exact(channels).map(|frame| frame[0]);
        loop {
            let mut n = 0;
            for (slot, sample) in self.mono.iter_mut().zip(frames.by_ref()) {
                *slot = sample;
                n += 1;
            }
            if n == 0 {
                break;
            }
            process_mono(&self.shared, &mut self.meter, &mut self.fifo, &self.mono[..n]);
            if n < self.block_size {
                break;
            }
        }
    }

    /// Processes one mono block: level, recording write, FFT FIFO.
    pub fn process_block(&mut self, block: &[f32]) {
        process_mono(&self.shared, &mut self.meter, &mut self.fifo, block);
    }

    pub fn meter(&self) -> &LevelMeter {
        &self.meter
    }
}

/// Work done by the output callback.
#[derive(Debug)]
pub struct OutputRenderer {
    shared: Arc<Shared>,
    tone: ToneGenerator,
    mono: Vec<f32>,
    last_log_freq: f64,
}

impl OutputRenderer {
    pub fn new(shared: Arc<Shared>, config: &EngineConfig) -> Self {
        let mut tone = ToneGenerator::new(shared.sample_rate());
        let last_log_freq = shared.log_freq();
        tone.set_frequency(10f64.powf(last_log_freq));
        Self {
            shared,
            tone,
            mono: vec![0.0; config.output_block_size.max(1)],
            last_log_freq,
        }
    }

    /// Entry point of the output stream callback.
    ///
    /// Renders the mono tone in chunks of the configured block size and
    /// copies it into every channel of the interleaved buffer. The tone
    /// target (frequency and enable) is sampled once per chunk.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for chunk in data.chunks_mut(self.mono.len() * channels) {
            let frames = chunk.len() / channels;
            self.sync_target();
            let mono = &mut self.mono[..frames];
            self.tone.render_block(mono);
            for (frame, &sample) in chunk.chunks_exact_mut(channels).zip(mono.iter()) {
                frame.fill(sample);
            }
            // trailing partial frame, if any
            let tail = frames * channels;
            chunk[tail..].fill(0.0);
        }
        self.shared
            .tone_state
            .store(self.tone.state() as u8, Ordering::Release);
    }

    fn sync_target(&mut self) {
        let log_freq = self.shared.log_freq();
        if log_freq != self.last_log_freq {
            self.tone.set_frequency(10f64.powf(log_freq));
            self.last_log_freq = log_freq;
        }
        self.tone.follow(self.shared.tone_enabled());
    }

    pub fn tone(&self) -> &ToneGenerator {
        &self.tone
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared() -> (Arc<Shared>, EngineConfig) {
        let config = EngineConfig::default();
        (Arc::new(Shared::new(&config)), config)
    }

    #[test]
    fn handoff_publishes_chronological_window() {
        let handoff = WindowHandoff::new(4);
        let ring = [3.0, 4.0, 1.0, 2.0];
        assert!(handoff.offer(&ring, 2));
        assert!(!handoff.offer(&ring, 2), "slot still held");
        assert_eq!(handoff.dropped(), 1);

        let mut out = Vec::new();
        assert!(handoff.take(&mut out));
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(!handoff.take(&mut out));
    }

    #[test]
    fn input_records_into_current_bucket_only_when_writing() {
        let (shared, config) = shared();
        let mut input = InputProcessor::new(shared.clone(), &config);
        let block = vec![0.1f32; 128];
        let bucket = shared.map().hz_to_bucket(442.0).unwrap();

        input.process_block(&block);
        assert_eq!(shared.store().level(0, bucket), Some(-90.0));

        shared.set_capture(true, true);
        for _ in 0..config.active_buffer_len() {
            input.process_block(&block);
        }
        let written = shared.store().level(0, bucket).unwrap();
        assert!((written - (-20.0)).abs() < 0.01, "wrote {written}");
        assert!((shared.level_db() - written).abs() < 1e-6);
    }

    #[test]
    fn interleaved_input_uses_first_channel() {
        let (shared, config) = shared();
        let mut input = InputProcessor::new(shared.clone(), &config);
        // channel 0 is silent, channel 1 is loud
        let data: Vec<f32> = (0..512).map(|i| if i % 2 == 0 { 0.0 } else { 0.9 }).collect();
        for _ in 0..8 {
            input.process_interleaved(&data, 2);
        }
        assert!(shared.level_db() < -100.0);
    }

    #[test]
    fn uneven_interleaved_callbacks_fill_the_fft_window() {
        let (shared, config) = shared();
        let mut input = InputProcessor::new(shared.clone(), &config);
        shared.set_fft_enabled(true);
        // 300 frames per callback: two full chunks and a partial one
        let data: Vec<f32> = (0..600).map(|i| if i % 2 == 0 { 0.5 } else { 0.0 }).collect();

        for _ in 0..6 {
            input.process_interleaved(&data, 2);
        }
        assert!(!shared.handoff().is_ready());
        input.process_interleaved(&data, 2);
        assert!(shared.handoff().is_ready());
    }

    #[test]
    fn fifo_hands_off_only_full_windows() {
        let (shared, config) = shared();
        let mut input = InputProcessor::new(shared.clone(), &config);
        let block = vec![0.25f32; 128];
        shared.set_fft_enabled(true);

        for _ in 0..15 {
            input.process_block(&block);
        }
        assert!(!shared.handoff().is_ready());
        input.process_block(&block);
        assert!(shared.handoff().is_ready());

        // worker busy: the next full window is dropped
        for _ in 0..16 {
            input.process_block(&block);
        }
        assert_eq!(shared.handoff().dropped(), 1);
    }

    #[test]
    fn output_follows_enable_with_ramps() {
        let (shared, config) = shared();
        let mut output = OutputRenderer::new(shared.clone(), &config);
        let mut data = vec![1.0f32; 512 * 2];

        output.render_interleaved(&mut data, 2);
        assert!(data.iter().all(|&s| s == 0.0));
        assert_eq!(shared.tone_state(), ToneState::Off);

        shared.set_tone_enabled(true);
        output.render_interleaved(&mut data, 2);
        assert_eq!(shared.tone_state(), ToneState::On);
        assert_eq!(data[0], 0.0);
        assert!(data.chunks_exact(2).all(|f| f[0] == f[1]));

        shared.set_tone_enabled(false);
        output.render_interleaved(&mut data, 2);
        assert_eq!(shared.tone_state(), ToneState::Off);
        assert_eq!(data[data.len() - 1], 0.0);
    }

    #[test]
    fn output_tracks_frequency_target() {
        let (shared, config) = shared();
        let mut output = OutputRenderer::new(shared.clone(), &config);
        assert!((output.tone().frequency() - 442.0).abs() < 1e-6);

        shared.set_log_freq(3.0);
        let mut data = vec![0.0f32; 512];
        output.render_interleaved(&mut data, 1);
        assert!((output.tone().frequency() - 1000.0).abs() < 1e-6);
    }
}
