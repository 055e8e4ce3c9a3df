//! Drives an engine without an audio device: the output renderer's blocks are
//! looped back into the input processor through a fake two-band response.

use std::time::{Duration, Instant};

use sweeper_core::processor::{InputProcessor, OutputRenderer};
use sweeper_core::table;
use sweeper_core::{Engine, EngineConfig, ImportReport, MeasurementMode, Notice};

const BLOCK: usize = 128;

/// Gain of the simulated loudspeaker/microphone chain.
fn response(hz: f64) -> f32 {
    if hz < 1000.0 { 0.5 } else { 0.05 }
}

fn small_config() -> EngineConfig {
    EngineConfig {
        bucket_count: 64,
        sweep_sub_steps: 2,
        ..EngineConfig::default()
    }
}

/// Renders one block, passes it through [`response`] and feeds it back.
fn loopback(engine: &Engine, output: &mut OutputRenderer, input: &mut InputProcessor) {
    let mut block = [0.0f32; BLOCK];
    output.render_interleaved(&mut block, 1);
    let gain = response(engine.snapshot().frequency_hz);
    for sample in block.iter_mut() {
        *sample *= gain;
    }
    input.process_interleaved(&block, 1);
}

fn db_of_sine(amplitude: f32) -> f32 {
    10.0 * (amplitude * amplitude / 2.0).log10()
}

#[test]
fn full_sweep_fills_track_and_survives_table_round_trip() {
    let config = small_config();
    let block_time = config.input_block_duration();
    let mut engine = Engine::new(config).unwrap();
    let (mut input, mut output) = engine.processors();

    let mut now = Instant::now();
    assert!(engine.start_sweep(now));
    let mut blocks = 0;
    while engine.snapshot().sweeping {
        loopback(&engine, &mut output, &mut input);
        now += block_time;
        engine.tick(now);
        blocks += 1;
        assert!(blocks < 200_000, "sweep did not finish");
    }

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.mode, MeasurementMode::Idle);
    assert_eq!(snapshot.sweep_progress, 1.0);
    assert!(engine.drain_notices().contains(&Notice::SweepCompleted));

    let levels = engine.track_levels(0).unwrap();
    assert_eq!(levels.len(), 64);
    assert!(levels.iter().all(|&l| l > -90.0), "every bucket written");

    let map = *engine.frequency_map();
    let low = map.hz_to_bucket(100.0).unwrap();
    let high = map.hz_to_bucket(5000.0).unwrap();
    assert!((levels[low] - db_of_sine(0.5)).abs() < 1.0, "100 Hz read {}", levels[low]);
    assert!((levels[high] - db_of_sine(0.05)).abs() < 1.0, "5 kHz read {}", levels[high]);

    // the other tracks were not touched
    assert!(engine.track_levels(1).unwrap().iter().all(|&l| l == -90.0));

    let mut text = Vec::new();
    table::write_table(&mut text, "track 1", engine.export_track(0).unwrap()).unwrap();
    let report = engine.import_table(text.as_slice(), 1).unwrap();
    assert_eq!(report, ImportReport { applied: 64, skipped: 0 });

    let copied = engine.track_levels(1).unwrap();
    for (a, b) in levels.iter().zip(&copied) {
        assert!((a - b).abs() < 1e-3);
    }

    assert!(engine.select_track(1, true));
    assert_eq!(engine.visible_tracks(), vec![0, 1]);
    assert_eq!(engine.current_track(), 1);
}

#[test]
fn pinned_frequency_records_continuously() {
    let config = small_config();
    let block_time = config.input_block_duration();
    let mut engine = Engine::new(config).unwrap();
    let (mut input, mut output) = engine.processors();
    engine.select_track(3, false);

    assert!(engine.set_manual_frequency(200.0));
    assert!(engine.pin_frequency());
    let bucket = engine.snapshot().bucket.unwrap();

    let mut now = Instant::now();
    let end = now + Duration::from_millis(400);
    while now < end {
        loopback(&engine, &mut output, &mut input);
        now += block_time;
        engine.tick(now);
    }

    let level = engine.track_levels(3).unwrap()[bucket];
    assert!((level - db_of_sine(0.5)).abs() < 1.0, "read {level}");
    assert!((engine.snapshot().level_db - level).abs() < 1e-6);

    assert!(engine.unpin_frequency());
    assert!(engine.reset_track(3));
    assert!(engine.track_levels(3).unwrap().iter().all(|&l| l == -90.0));
}

#[test]
fn selecting_tracks_mid_sweep_keeps_the_sweep_target() {
    let config = small_config();
    let block_time = config.input_block_duration();
    let mut engine = Engine::new(config).unwrap();
    let (mut input, mut output) = engine.processors();

    let mut now = Instant::now();
    assert!(engine.start_sweep(now));
    let mut blocks = 0;
    while engine.snapshot().sweeping {
        loopback(&engine, &mut output, &mut input);
        now += block_time;
        engine.tick(now);
        blocks += 1;
        if blocks == 50 {
            assert!(engine.snapshot().sweeping);
            assert!(engine.select_track(2, true));
        }
        assert!(blocks < 200_000, "sweep did not finish");
    }

    assert_eq!(engine.current_track(), 2);
    assert!(engine.drain_notices().contains(&Notice::SweepCompleted));
    let swept = engine.track_levels(0).unwrap();
    assert!(swept.iter().all(|&l| l > -90.0), "sweep target completed");
    assert!(engine.track_levels(2).unwrap().iter().all(|&l| l == -90.0));
}
