//! # Audio I/O Module
//!
//! Owns the duplex cpal streams. The input stream feeds an
//! [`InputProcessor`], the output stream pulls from an [`OutputRenderer`];
//! both callbacks only see the [`Shared`] atomics.
//!
//! ## Features
//! - Device enumeration for the default host
//! - Device selection by name, defaults when no name is given
//! - `f32` stream configuration at the engine sample rate, fixed buffer size
//!   when the device supports it
//! - Stream errors counted and forwarded as notices, never fatal
//! - Click-free shutdown: the tone is ramped off before the streams close

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SupportedBufferSize, SupportedStreamConfigRange};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::engine::Notice;
use crate::processor::{InputProcessor, OutputRenderer, Shared};

/// Longest wait for the output to finish its fade out on close.
const RAMP_DOWN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// An audio device as listed to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub direction: Direction,
    pub is_default: bool,
}

/// Lists the input and output devices of the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let host = cpal::default_host();
    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for device in host.input_devices().context("failed to enumerate input devices")? {
        let name = device.name().unwrap_or_else(|_| String::from("<unnamed>"));
        devices.push(DeviceInfo {
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
            direction: Direction::Input,
        });
    }
    for device in host.output_devices().context("failed to enumerate output devices")? {
        let name = device.name().unwrap_or_else(|_| String::from("<unnamed>"));
        devices.push(DeviceInfo {
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
            direction: Direction::Output,
        });
    }
    Ok(devices)
}

/// Finds a device by name, or the default one for `direction`.
fn find_device(host: &cpal::Host, name: Option<&str>, direction: Direction) -> Result<cpal::Device> {
    let Some(name) = name else {
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        return device.ok_or_else(|| anyhow!("No {} device available", direction));
    };

    let devices: Vec<cpal::Device> = match direction {
        Direction::Input => host.input_devices()?.collect(),
        Direction::Output => host.output_devices()?.collect(),
    };
    devices
        .into_iter()
        .find(|d| d.name().map(|n| n == name).unwrap_or(false))
        .ok_or_else(|| anyhow!("No {} device named '{}'", direction, name))
}

/// Picks a stream configuration from the ranges a device supports.
///
/// Requires `f32` samples and a range containing `sample_rate`; among those
/// the one with the fewest channels wins. The buffer size is fixed to
/// `block_size` frames if the device allows it, otherwise left to the host.
///
/// # Returns
/// * `Some(config)` - configuration to open the stream with
/// * `None` - the device cannot run at this rate in `f32`
fn choose_config(
    ranges: Vec<SupportedStreamConfigRange>,
    sample_rate: u32,
    block_size: usize,
) -> Option<cpal::StreamConfig> {
    let rate = cpal::SampleRate(sample_rate);
    let range = ranges
        .into_iter()
        .filter(|c| {
            c.sample_format() == cpal::SampleFormat::F32
                && c.min_sample_rate() <= rate
                && rate <= c.max_sample_rate()
        })
        .min_by_key(|c| c.channels())?;

    let buffer_size = match *range.buffer_size() {
        SupportedBufferSize::Range { min, max } if (min..=max).contains(&(block_size as u32)) => {
            BufferSize::Fixed(block_size as u32)
        }
        _ => BufferSize::Default,
    };
    let mut config: cpal::StreamConfig = range.with_sample_rate(rate).into();
    config.buffer_size = buffer_size;
    Some(config)
}

fn error_callback(
    shared: Arc<Shared>,
    notices: Sender<Notice>,
    direction: Direction,
) -> impl FnMut(cpal::StreamError) + Send + 'static {
    move |err| {
        shared.record_overrun();
        let _ = notices.try_send(Notice::StreamError(format!("{} stream: {}", direction, err)));
    }
}

/// A running input/output stream pair.
///
/// Dropping the bridge closes it the same way [`AudioIOBridge::close`] does.
pub struct AudioIOBridge {
    shared: Arc<Shared>,
    input_stream: Option<cpal::Stream>,
    output_stream: Option<cpal::Stream>,
    input_name: String,
    output_name: String,
}

impl AudioIOBridge {
    /// Opens and starts both streams.
    ///
    /// # Arguments
    /// * `shared` - state the callbacks read and write
    /// * `config` - sample rate and block sizes
    /// * `input` / `output` - device names, `None` for the host defaults
    /// * `notices` - receives stream errors raised after start
    ///
    /// # Returns
    /// * `Ok(bridge)` - both streams playing
    /// * `Err(e)` - either side failed; nothing is left open
    pub fn open(
        shared: Arc<Shared>,
        config: &EngineConfig,
        input: Option<&str>,
        output: Option<&str>,
        notices: Sender<Notice>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let input_device = find_device(&host, input, Direction::Input)?;
        let output_device = find_device(&host, output, Direction::Output)?;
        let input_name = input_device.name().unwrap_or_default();
        let output_name = output_device.name().unwrap_or_default();

        let input_config = choose_config(
            input_device.supported_input_configs()?.collect(),
            config.sample_rate,
            config.input_block_size,
        )
        .ok_or_else(|| {
            anyhow!("Input device '{}' has no f32 format at {} Hz", input_name, config.sample_rate)
        })?;
        let output_config = choose_config(
            output_device.supported_output_configs()?.collect(),
            config.sample_rate,
            config.output_block_size,
        )
        .ok_or_else(|| {
            anyhow!("Output device '{}' has no f32 format at {} Hz", output_name, config.sample_rate)
        })?;

        log::info!(
            "[AUDIO] Input '{}': {} ch, {:?}",
            input_name,
            input_config.channels,
            input_config.buffer_size
        );
        log::info!(
            "[AUDIO] Output '{}': {} ch, {:?}",
            output_name,
            output_config.channels,
            output_config.buffer_size
        );

        let mut processor = InputProcessor::new(shared.clone(), config);
        let in_channels = input_config.channels as usize;
        let input_stream = input_device
            .build_input_stream(
                &input_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    processor.process_interleaved(data, in_channels);
                },
                error_callback(shared.clone(), notices.clone(), Direction::Input),
                None,
            )
            .with_context(|| format!("failed to build input stream on '{}'", input_name))?;

        let mut renderer = OutputRenderer::new(shared.clone(), config);
        let out_channels = output_config.channels as usize;
        let output_stream = output_device
            .build_output_stream(
                &output_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    renderer.render_interleaved(data, out_channels);
                },
                error_callback(shared.clone(), notices, Direction::Output),
                None,
            )
            .with_context(|| format!("failed to build output stream on '{}'", output_name))?;

        output_stream.play().context("failed to start output stream")?;
        input_stream.play().context("failed to start input stream")?;
        log::info!("[AUDIO] Streams running at {} Hz", config.sample_rate);

        Ok(Self {
            shared,
            input_stream: Some(input_stream),
            output_stream: Some(output_stream),
            input_name,
            output_name,
        })
    }

    pub fn is_running(&self) -> bool {
        self.input_stream.is_some() && self.output_stream.is_some()
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Ramps the tone off, then pauses and drops both streams.
    ///
    /// The wait for the fade out is bounded; a stalled output device cannot
    /// block the caller.
    pub fn close(&mut self) {
        if self.input_stream.is_none() && self.output_stream.is_none() {
            return;
        }

        self.shared.set_tone_enabled(false);
        if self.output_stream.is_some() {
            let deadline = Instant::now() + RAMP_DOWN_TIMEOUT;
            while self.shared.tone_state().is_sounding() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
            if self.shared.tone_state().is_sounding() {
                log::warn!("[AUDIO] Output did not finish its fade out");
            }
        }

        for stream in [self.output_stream.take(), self.input_stream.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = stream.pause() {
                log::warn!("[AUDIO] Error pausing stream: {}", e);
            }
        }
        log::info!("[AUDIO] Streams closed");
    }
}

impl Drop for AudioIOBridge {
    fn drop(&mut self) {
        self.close();
    }
}
