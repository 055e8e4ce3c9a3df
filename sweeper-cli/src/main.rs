//! # Sweeper Command Line Front End
//!
//! Headless front end for the sweeper engine.
//!
//! ## Architecture
//! - **Engine**: owns the audio streams and the analyzer thread
//! - **Main loop**: polls the engine every 16 ms, like a display refresh
//! - **Interrupts**: Ctrl-C is delivered over a crossbeam channel and aborts
//!   the running command cleanly (tone ramped off, streams closed)
//!
//! ## Commands
//! - `devices`: list input and output devices
//! - `sweep`: measure the frequency response and write it as a table
//! - `tone`: play a pinned tone and print the measured level
//! - `spectrum`: print the strongest FFT bin of the live input
//! - `write-config`: write the default (or loaded) settings as JSON

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use crossbeam_channel::{Receiver, bounded};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use sweeper_core::{Direction, Engine, EngineConfig, Notice, list_devices};

/// Poll interval of the main loop.
const TICK: Duration = Duration::from_millis(16);

/// Interval between printed readings.
const REPORT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "sweeper", version, about = "Measures frequency responses with a swept sine")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Input device name (default device if omitted)
    #[arg(long, global = true)]
    input: Option<String>,

    /// Output device name (default device if omitted)
    #[arg(long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List audio devices
    Devices,
    /// Sweep the audible range and write the result as a table
    Sweep {
        /// Destination table
        #[arg(long)]
        out: PathBuf,
        /// Track to record into, starting at 1
        #[arg(long, default_value_t = 1)]
        track: usize,
        /// Table loaded into the track before sweeping
        #[arg(long)]
        base: Option<PathBuf>,
    },
    /// Play a tone at a fixed frequency and print the input level
    Tone {
        /// Tone frequency in Hz
        #[arg(long, default_value_t = 442.0)]
        freq: f64,
        /// Duration, runs until Ctrl-C when omitted
        #[arg(long)]
        seconds: Option<f64>,
    },
    /// Print the dominant frequency of the live input
    Spectrum {
        /// Window function (rectangular, hann, hamming, blackman, bartlett)
        #[arg(long)]
        window: Option<String>,
        /// Duration, runs until Ctrl-C when omitted
        #[arg(long)]
        seconds: Option<f64>,
    },
    /// Write the settings as JSON
    WriteConfig {
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match &cli.command {
        Command::Devices => print_devices(),
        Command::WriteConfig { out } => config.save(out),
        Command::Sweep { out, track, base } => {
            let (mut engine, interrupt) = start(config, &cli)?;
            run_sweep(&mut engine, &interrupt, out, *track, base.as_deref())
        }
        Command::Tone { freq, seconds } => {
            let (mut engine, interrupt) = start(config, &cli)?;
            run_tone(&mut engine, &interrupt, *freq, *seconds)
        }
        Command::Spectrum { window, seconds } => {
            let (mut engine, interrupt) = start(config, &cli)?;
            run_spectrum(&mut engine, &interrupt, window.as_deref(), *seconds)
        }
    }
}

fn print_devices() -> Result<()> {
    let devices = list_devices()?;
    for direction in [Direction::Input, Direction::Output] {
        println!("{} devices:", direction);
        for device in devices.iter().filter(|d| d.direction == direction) {
            let marker = if device.is_default { "*" } else { " " };
            println!("  {} {}", marker, device.name);
        }
    }
    Ok(())
}

/// Builds the engine, opens the devices and installs the Ctrl-C handler.
///
/// Failing to open any stream is fatal here.
fn start(config: EngineConfig, cli: &Cli) -> Result<(Engine, Receiver<()>)> {
    let mut engine = Engine::new(config)?;
    engine
        .select_audio_devices(cli.input.as_deref(), cli.output.as_deref())
        .context("cannot measure without audio streams")?;

    let (interrupt_tx, interrupt_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.try_send(());
    })
    .context("failed to install Ctrl-C handler")?;

    Ok((engine, interrupt_rx))
}

/// Polls the engine until `on_tick` returns false, the deadline passes or
/// Ctrl-C is pressed. Returns false if interrupted.
fn poll_engine<F>(
    engine: &mut Engine,
    interrupt: &Receiver<()>,
    deadline: Option<Instant>,
    mut on_tick: F,
) -> bool
where
    F: FnMut(&mut Engine, Instant) -> bool,
{
    loop {
        crossbeam_channel::select! {
            recv(interrupt) -> _ => return false,
            default(TICK) => {}
        }

        let now = Instant::now();
        engine.tick(now);
        for notice in engine.drain_notices() {
            match notice {
                Notice::DeviceError(_) | Notice::StreamError(_) => log::warn!("{}", notice),
                _ => log::info!("{}", notice),
            }
        }
        if !on_tick(engine, now) {
            return true;
        }
        if deadline.is_some_and(|d| now >= d) {
            return true;
        }
    }
}

fn deadline_after(seconds: Option<f64>) -> Result<Option<Instant>> {
    seconds
        .map(|s| {
            Duration::try_from_secs_f64(s)
                .map(|d| Instant::now() + d)
                .map_err(|_| anyhow!("invalid duration {} s", s))
        })
        .transpose()
}

fn run_sweep(
    engine: &mut Engine,
    interrupt: &Receiver<()>,
    out: &Path,
    track: usize,
    base: Option<&Path>,
) -> Result<()> {
    let index = track
        .checked_sub(1)
        .filter(|&i| i < engine.config().track_count)
        .ok_or_else(|| anyhow!("track must be between 1 and {}", engine.config().track_count))?;
    engine.select_track(index, false);
    if let Some(base) = base {
        engine.import_track_from(base, index)?;
    }

    if !engine.start_sweep(Instant::now()) {
        return Err(anyhow!("a sweep cannot start in the current mode"));
    }
    let mut reported = 0;
    let finished = poll_engine(engine, interrupt, None, |engine, _| {
        let snapshot = engine.snapshot();
        let decile = (snapshot.sweep_progress * 10.0) as u32;
        if decile > reported && snapshot.sweeping {
            reported = decile;
            log::info!("[SWEEP] {} ({:.1} dB)", snapshot.status, snapshot.level_db);
        }
        snapshot.sweeping
    });

    if !finished {
        engine.abort_sweep();
        engine.tick(Instant::now());
        engine.shutdown();
        return Err(anyhow!("sweep interrupted, nothing written"));
    }

    engine.export_track_to(out, index)?;
    engine.shutdown();
    println!("Wrote {}", out.display());
    Ok(())
}

fn run_tone(
    engine: &mut Engine,
    interrupt: &Receiver<()>,
    freq: f64,
    seconds: Option<f64>,
) -> Result<()> {
    if !engine.set_manual_frequency(freq) || !engine.pin_frequency() {
        return Err(anyhow!("cannot play a tone at {} Hz", freq));
    }
    let deadline = deadline_after(seconds)?;
    let mut last_report = Instant::now();
    poll_engine(engine, interrupt, deadline, |engine, now| {
        if now.duration_since(last_report) >= REPORT_INTERVAL {
            last_report = now;
            let snapshot = engine.snapshot();
            println!("{:9.1} Hz  {:7.2} dBFS", snapshot.frequency_hz, snapshot.level_db);
        }
        true
    });
    engine.unpin_frequency();
    engine.shutdown();
    Ok(())
}

fn run_spectrum(
    engine: &mut Engine,
    interrupt: &Receiver<()>,
    window: Option<&str>,
    seconds: Option<f64>,
) -> Result<()> {
    if let Some(name) = window {
        engine.select_fft_window(name)?;
    }
    engine.toggle_fft();
    let sample_rate = engine.config().sample_rate;
    let deadline = deadline_after(seconds)?;
    let mut last_sequence = 0;
    let mut last_report = Instant::now();
    poll_engine(engine, interrupt, deadline, |engine, now| {
        if now.duration_since(last_report) < REPORT_INTERVAL {
            return true;
        }
        if let Some(frame) = engine.fft_frame().filter(|f| f.sequence != last_sequence) {
            last_sequence = frame.sequence;
            last_report = now;
            if let Some((hz, db)) = frame.peak(sample_rate) {
                println!("peak {:9.1} Hz  {:7.2} dB  ({})", hz, db, frame.window);
            }
        }
        true
    });
    engine.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sweep_with_global_options() {
        let cli = Cli::parse_from([
            "sweeper", "sweep", "--out", "response.csv", "--track", "3", "--input", "Mic",
        ]);
        assert_eq!(cli.input.as_deref(), Some("Mic"));
        match cli.command {
            Command::Sweep { out, track, base } => {
                assert_eq!(out, PathBuf::from("response.csv"));
                assert_eq!(track, 3);
                assert!(base.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn deadline_rejects_negative_durations() {
        assert!(deadline_after(Some(-1.0)).is_err());
        assert!(deadline_after(None).unwrap().is_none());
        assert!(deadline_after(Some(0.5)).unwrap().is_some());
    }
}
