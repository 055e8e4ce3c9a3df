//! Click-free sine tone generator used by the output callback.

use std::f64::consts::TAU;

/// Output state of the [`ToneGenerator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ToneState {
    Off = 0,
    /// The next block fades in.
    RampingOn = 1,
    On = 2,
    /// The next block fades out.
    RampingOff = 3,
}

impl ToneState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::RampingOn,
            2 => Self::On,
            3 => Self::RampingOff,
            _ => Self::Off,
        }
    }

    /// True while any non-silent block is still to come.
    pub fn is_sounding(self) -> bool {
        self != Self::Off
    }
}

/// Continuous-phase sine oscillator with one-block fade in/out.
///
/// Frequency changes only touch the phase increment, so a tone can be swept
/// while playing without discontinuities. The phase is reset to zero when the
/// fade out completes.
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    sample_rate: f64,
    phase: f64,
    phase_increment: f64,
    state: ToneState,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate as f64,
            phase: 0.0,
            phase_increment: 0.0,
            state: ToneState::Off,
        }
    }

    /// Sets the tone frequency, clamped to `[0, nyquist]`.
    pub fn set_frequency(&mut self, hz: f64) {
        let hz = if hz.is_finite() { hz.clamp(0.0, self.sample_rate / 2.0) } else { 0.0 };
        self.phase_increment = TAU * hz / self.sample_rate;
    }

    pub fn frequency(&self) -> f64 {
        self.phase_increment * self.sample_rate / TAU
    }

    pub fn state(&self) -> ToneState {
        self.state
    }

    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Begins a fade in. Only valid from [`ToneState::Off`].
    pub fn start(&mut self) -> bool {
        if self.state == ToneState::Off {
            self.state = ToneState::RampingOn;
            true
        } else {
            false
        }
    }

    /// Begins a fade out. Only valid from [`ToneState::On`].
    pub fn stop(&mut self) -> bool {
        if self.state == ToneState::On {
            self.state = ToneState::RampingOff;
            true
        } else {
            false
        }
    }

    /// Drives the state machine toward `enabled`, one transition at a time.
    pub fn follow(&mut self, enabled: bool) {
        if enabled {
            self.start();
        } else {
            self.stop();
        }
    }

    /// Renders one block and advances the ramp states.
    ///
    /// Fade blocks are shaped by a linear ramp whose boundary sample is exactly
    /// zero: the first sample of a fade in and the last sample of a fade out.
    pub fn render_block(&mut self, out: &mut [f32]) {
        if self.state == ToneState::Off {
            out.fill(0.0);
            return;
        }
        if out.is_empty() {
            return;
        }

        let last = (out.len() - 1).max(1) as f32;
        for (i, sample) in out.iter_mut().enumerate() {
            let gain = match self.state {
                ToneState::RampingOn => i as f32 / last,
                ToneState::RampingOff => 1.0 - i as f32 / last,
                _ => 1.0,
            };
            *sample = self.phase.sin() as f32 * gain.clamp(0.0, 1.0);

            self.phase += self.phase_increment;
            if self.phase >= TAU {
                self.phase -= TAU;
            }
        }

        self.state = match self.state {
            ToneState::RampingOn => ToneState::On,
            ToneState::RampingOff => {
                self.phase = 0.0;
                ToneState::Off
            }
            steady => steady,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing(freq: f64) -> ToneGenerator {
        let mut tone = ToneGenerator::new(44100);
        tone.set_frequency(freq);
        tone
    }

    #[test]
    fn off_renders_silence() {
        let mut tone = playing(1000.0);
        let mut block = [1.0f32; 64];
        tone.render_block(&mut block);
        assert!(block.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn state_machine_transitions() {
        let mut tone = playing(1000.0);
        let mut block = [0.0f32; 32];

        assert!(!tone.stop(), "stop is only valid from On");
        assert!(tone.start());
        assert_eq!(tone.state(), ToneState::RampingOn);
        tone.render_block(&mut block);
        assert_eq!(tone.state(), ToneState::On);
        assert!(!tone.start());
        assert!(tone.stop());
        tone.render_block(&mut block);
        assert_eq!(tone.state(), ToneState::Off);
        assert_eq!(tone.phase(), 0.0);
    }

    #[test]
    fn ramps_start_and_end_at_zero() {
        let mut tone = playing(1234.5);
        let mut block = [0.0f32; 128];

        tone.start();
        tone.render_block(&mut block);
        assert_eq!(block[0], 0.0);
        assert!(block.iter().all(|s| s.abs() <= 1.0));

        tone.render_block(&mut block);
        tone.stop();
        let mut fade = [0.0f32; 128];
        tone.render_block(&mut fade);
        assert_eq!(fade[127], 0.0);
        assert!(fade.iter().all(|s| s.abs() <= 1.0));
        // the fade out continues the steady block's waveform
        let step = (block[127] - fade[0]).abs();
        assert!(step < 0.2, "discontinuity of {step} at the fade boundary");
    }

    #[test]
    fn frequency_change_keeps_phase_continuous() {
        let mut tone = playing(500.0);
        tone.start();
        let mut block = [0.0f32; 256];
        tone.render_block(&mut block);
        let phase = tone.phase();
        tone.set_frequency(700.0);
        assert_eq!(tone.phase(), phase);
        tone.render_block(&mut block);
        assert!(tone.phase() >= 0.0 && tone.phase() < TAU);
    }

    #[test]
    fn steady_block_is_a_unit_sine() {
        let mut tone = playing(441.0);
        tone.start();
        let mut block = [0.0f32; 100];
        tone.render_block(&mut block);
        tone.render_block(&mut block);
        let peak = block.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.99 && peak <= 1.0);
    }

    #[test]
    fn frequency_is_clamped_to_nyquist() {
        let tone = playing(40000.0);
        assert!((tone.frequency() - 22050.0).abs() < 1e-6);
    }
}
