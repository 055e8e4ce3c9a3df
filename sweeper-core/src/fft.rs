//! # Spectrum Analyzer Module
//!
//! Live FFT of the raw input, computed on a dedicated worker thread.
//!
//! ## Features
//! - Forward FFT using RustFFT with pre-planned scratch space
//! - Selectable window function, coefficient table rebuilt only on change
//! - Magnitudes in dB over the first `n/2 + 1` bins
//! - Per-bin display coordinates through the shared [`FrequencyMap`]
//! - Lock-free publication of the latest frame to the presentation layer
//!
//! The worker polls the [`WindowHandoff`](crate::processor::WindowHandoff)
//! filled by the input callback; it never touches the audio threads
//! otherwise.

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, bounded};
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use triple_buffer::TripleBuffer;

use crate::frequency_map::FrequencyMap;
use crate::processor::Shared;
use crate::window::WindowFunction;

/// Added to the normalized magnitude before taking the log.
pub const FFT_EPSILON: f32 = 1e-12;

/// How often the worker checks the hand-off slot.
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Windowed forward FFT producing dB magnitudes.
pub struct FftProcessor {
    size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: WindowFunction,
    coefficients: Vec<f32>,
    buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
}

impl FftProcessor {
    /// # Arguments
    /// * `size` - window length in samples
    /// * `window` - initial window function
    pub fn new(size: usize, window: WindowFunction) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(size);
        let scratch = vec![Complex::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Self {
            size,
            fft,
            window,
            coefficients: window.generate(size),
            buffer: vec![Complex::new(0.0, 0.0); size],
            scratch,
            magnitudes: vec![0.0; size / 2 + 1],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn window(&self) -> WindowFunction {
        self.window
    }

    pub fn set_window(&mut self, window: WindowFunction) {
        if window != self.window {
            self.window = window;
            self.coefficients = window.generate(self.size);
        }
    }

    /// Transforms one window of samples.
    ///
    /// Returns `20·log10(|X[k]| / n + ε)` for `k` in `0..=n/2`. Input shorter
    /// than the window is zero padded; extra samples are ignored.
    pub fn process(&mut self, samples: &[f32]) -> &[f32] {
        for (i, (slot, &w)) in self.buffer.iter_mut().zip(&self.coefficients).enumerate() {
            let sample = samples.get(i).copied().unwrap_or(0.0);
            *slot = Complex::new(sample * w, 0.0);
        }

        self.fft.process_with_scratch(&mut self.buffer, &mut self.scratch);

        let n = self.size as f32;
        for (magnitude, bin) in self.magnitudes.iter_mut().zip(&self.buffer) {
            *magnitude = 20.0 * (bin.norm() / n + FFT_EPSILON).log10();
        }
        &self.magnitudes
    }

    /// Centre frequency of bin `k`.
    pub fn bin_frequency(&self, bin: usize, sample_rate: u32) -> f32 {
        bin as f32 * sample_rate as f32 / self.size as f32
    }
}

/// One analyzed window as published to the presentation layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FftFrame {
    /// Window function the frame was computed with.
    pub window: WindowFunction,
    /// dB magnitude per bin, `n/2 + 1` values.
    pub magnitudes_db: Vec<f32>,
    /// Display coordinates (x, y) for bins 1..=n/2; DC has no log position.
    pub points: Vec<(f32, f32)>,
    /// Increments with every published frame, 0 before the first.
    pub sequence: u64,
}

impl FftFrame {
    /// Frequency and level of the strongest bin above DC.
    pub fn peak(&self, sample_rate: u32) -> Option<(f32, f32)> {
        let n = self.magnitudes_db.len().saturating_sub(1) * 2;
        if n == 0 {
            return None;
        }
        self.magnitudes_db
            .iter()
            .enumerate()
            .skip(1)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(k, &db)| (k as f32 * sample_rate as f32 / n as f32, db))
    }
}

/// Cloneable reader side of the published frames.
#[derive(Clone)]
pub struct FftOutput {
    output: Arc<Mutex<triple_buffer::Output<FftFrame>>>,
}

impl FftOutput {
    /// Latest published frame, or an empty one if the reader is busy.
    pub fn read(&self) -> FftFrame {
        match self.output.try_lock() {
            Ok(mut output) => output.read().clone(),
            Err(_) => FftFrame::default(),
        }
    }
}

/// Worker-side state: transforms windows and converts bins to coordinates.
struct AnalyzerWorker {
    shared: Arc<Shared>,
    processor: FftProcessor,
    map: FrequencyMap,
    samples: Vec<f32>,
    sequence: u64,
}

impl AnalyzerWorker {
    fn new(shared: Arc<Shared>) -> Self {
        let size = shared.handoff().len();
        let processor = FftProcessor::new(size, shared.fft_window());
        let map = *shared.map();
        Self {
            shared,
            processor,
            map,
            samples: Vec::with_capacity(size),
            sequence: 0,
        }
    }

    /// Analyzes a pending window, if any.
    fn poll(&mut self) -> Option<FftFrame> {
        if !self.shared.handoff().take(&mut self.samples) {
            return None;
        }
        Some(self.analyze())
    }

    fn analyze(&mut self) -> FftFrame {
        self.processor.set_window(self.shared.fft_window());

        let (width, height) = self.shared.extent();
        if (width, height) != self.map.extent() {
            self.map.set_extent(width, height);
        }

        let sample_rate = self.shared.sample_rate();
        let magnitudes = self.processor.process(&self.samples).to_vec();
        let points = magnitudes
            .iter()
            .enumerate()
            .skip(1)
            .map(|(k, &db)| {
                let hz = self.processor.bin_frequency(k, sample_rate) as f64;
                let x = self.map.log_to_pixel(hz.log10());
                let y = self.map.db_to_pixel(db);
                (x as f32, y as f32)
            })
            .collect();

        self.sequence += 1;
        FftFrame {
            window: self.processor.window(),
            magnitudes_db: magnitudes,
            points,
            sequence: self.sequence,
        }
    }
}

/// Owns the analyzer worker thread.
///
/// The thread runs for the lifetime of the engine and is stopped on drop.
pub struct SpectrumAnalyzer {
    shutdown_tx: Sender<()>,
    thread_handle: Option<JoinHandle<()>>,
    output: FftOutput,
}

impl SpectrumAnalyzer {
    /// Spawns the worker for the window size of `shared`'s hand-off slot.
    pub fn spawn(shared: Arc<Shared>) -> Result<Self> {
        let (mut input, output) = TripleBuffer::new(&FftFrame::default()).split();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let mut worker = AnalyzerWorker::new(shared);
        log::info!(
            "[FFT] Starting analyzer: {} samples, {} window",
            worker.processor.size(),
            worker.processor.window()
        );

        let thread_handle = thread::Builder::new()
            .name("sweeper-fft".into())
            .spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(shutdown_rx) -> _ => break,
                        default(POLL_INTERVAL) => {
                            if let Some(frame) = worker.poll() {
                                input.write(frame);
                            }
                        }
                    }
                }
                log::debug!("[FFT] Analyzer thread finished");
            })
            .context("failed to spawn the FFT worker thread")?;

        Ok(Self {
            shutdown_tx,
            thread_handle: Some(thread_handle),
            output: FftOutput {
                output: Arc::new(Mutex::new(output)),
            },
        })
    }

    pub fn output(&self) -> FftOutput {
        self.output.clone()
    }

    /// Stops the worker and waits for it to exit.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = self.shutdown_tx.try_send(());
            if handle.join().is_err() {
                log::error!("[FFT] Analyzer thread panicked");
            }
        }
    }
}

impl Drop for SpectrumAnalyzer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
