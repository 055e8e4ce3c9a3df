//! Measurement mode state machine.
//!
//! Coordinates tone output, recording, frequency lock and sweeping so that at
//! most one of them drives writes into the spectrum store.

use std::fmt;
use std::time::{Duration, Instant};

/// Current measurement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementMode {
    Idle,
    /// Interaction in progress, tone playing, recording not started yet.
    ManualArmed { since: Instant },
    ManualRecording,
    /// Frequency pinned, recording continuously.
    LockedRecording,
    Sweeping,
}

impl MeasurementMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ManualArmed { .. } => "armed",
            Self::ManualRecording => "recording",
            Self::LockedRecording => "locked",
            Self::Sweeping => "sweeping",
        }
    }
}

impl fmt::Display for MeasurementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Owns the [`MeasurementMode`] and its transition rules.
///
/// Every transition method returns whether the transition happened; invalid
/// requests leave the mode untouched.
#[derive(Debug, Clone)]
pub struct ModeMachine {
    mode: MeasurementMode,
    arm_delay: Duration,
    recording_enabled: bool,
}

impl ModeMachine {
    pub fn new(arm_delay: Duration, recording_enabled: bool) -> Self {
        Self {
            mode: MeasurementMode::Idle,
            arm_delay,
            recording_enabled,
        }
    }

    pub fn mode(&self) -> MeasurementMode {
        self.mode
    }

    /// Pointer press: tone starts now, recording after the arm delay.
    pub fn begin_interaction(&mut self, now: Instant) -> bool {
        if self.mode != MeasurementMode::Idle {
            return false;
        }
        self.mode = MeasurementMode::ManualArmed { since: now };
        true
    }

    /// Pointer release: back to idle from any manual or locked mode.
    pub fn end_interaction(&mut self) -> bool {
        match self.mode {
            MeasurementMode::ManualArmed { .. }
            | MeasurementMode::ManualRecording
            | MeasurementMode::LockedRecording => {
                self.mode = MeasurementMode::Idle;
                true
            }
            _ => false,
        }
    }

    pub fn pin(&mut self) -> bool {
        if self.mode != MeasurementMode::Idle {
            return false;
        }
        self.mode = MeasurementMode::LockedRecording;
        true
    }

    pub fn unpin(&mut self) -> bool {
        if self.mode != MeasurementMode::LockedRecording {
            return false;
        }
        self.mode = MeasurementMode::Idle;
        true
    }

    /// Enters sweeping from idle or locked; the lock is released.
    pub fn start_sweep(&mut self) -> bool {
        match self.mode {
            MeasurementMode::Idle | MeasurementMode::LockedRecording => {
                self.mode = MeasurementMode::Sweeping;
                true
            }
            _ => false,
        }
    }

    /// Sweep completed or aborted.
    pub fn finish_sweep(&mut self) -> bool {
        if self.mode != MeasurementMode::Sweeping {
            return false;
        }
        self.mode = MeasurementMode::Idle;
        true
    }

    /// Promotes an armed interaction to recording once the delay has passed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let MeasurementMode::ManualArmed { since } = self.mode {
            if self.recording_enabled && now.saturating_duration_since(since) >= self.arm_delay {
                self.mode = MeasurementMode::ManualRecording;
                return true;
            }
        }
        false
    }

    pub fn recording_enabled(&self) -> bool {
        self.recording_enabled
    }

    /// Flips the "record while interacting" switch.
    ///
    /// Disabling it during manual recording falls back to armed (tone only);
    /// enabling it lets the next [`ModeMachine::tick`] promote again.
    pub fn toggle_recording_enabled(&mut self, now: Instant) -> bool {
        self.recording_enabled = !self.recording_enabled;
        if !self.recording_enabled && self.mode == MeasurementMode::ManualRecording {
            self.mode = MeasurementMode::ManualArmed { since: now };
        }
        self.recording_enabled
    }

    pub fn tone_on(&self) -> bool {
        self.mode != MeasurementMode::Idle
    }

    /// Whether the active level buffer should be in use.
    pub fn recording(&self) -> bool {
        matches!(
            self.mode,
            MeasurementMode::ManualRecording
                | MeasurementMode::LockedRecording
                | MeasurementMode::Sweeping
        )
    }

    pub fn lock_frequency(&self) -> bool {
        self.mode == MeasurementMode::LockedRecording
    }

    pub fn sweeping(&self) -> bool {
        self.mode == MeasurementMode::Sweeping
    }

    /// Whether the input callback writes levels itself. The sweep commits its
    /// own readings, so this is false while sweeping.
    pub fn callback_writes(&self) -> bool {
        matches!(
            self.mode,
            MeasurementMode::ManualRecording | MeasurementMode::LockedRecording
        )
    }

    /// Whether user frequency changes are accepted.
    pub fn frequency_follows_user(&self) -> bool {
        !matches!(
            self.mode,
            MeasurementMode::LockedRecording | MeasurementMode::Sweeping
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(200);

    #[test]
    fn manual_recording_waits_for_arm_delay() {
        let t0 = Instant::now();
        let mut machine = ModeMachine::new(DELAY, true);
        assert!(machine.begin_interaction(t0));
        assert!(machine.tone_on());
        assert!(!machine.recording());

        assert!(!machine.tick(t0 + Duration::from_millis(150)));
        assert!(machine.tick(t0 + DELAY));
        assert_eq!(machine.mode(), MeasurementMode::ManualRecording);
        assert!(machine.callback_writes());

        assert!(machine.end_interaction());
        assert_eq!(machine.mode(), MeasurementMode::Idle);
        assert!(!machine.tone_on());
    }

    #[test]
    fn release_before_delay_never_records() {
        let t0 = Instant::now();
        let mut machine = ModeMachine::new(DELAY, true);
        machine.begin_interaction(t0);
        machine.end_interaction();
        assert!(!machine.tick(t0 + Duration::from_secs(1)));
        assert_eq!(machine.mode(), MeasurementMode::Idle);
    }

    #[test]
    fn disabled_recording_stays_armed() {
        let t0 = Instant::now();
        let mut machine = ModeMachine::new(DELAY, false);
        machine.begin_interaction(t0);
        assert!(!machine.tick(t0 + Duration::from_secs(1)));
        assert!(machine.tone_on());

        assert!(machine.toggle_recording_enabled(t0));
        assert!(machine.tick(t0 + Duration::from_secs(1)));
        assert!(!machine.toggle_recording_enabled(t0));
        assert!(matches!(machine.mode(), MeasurementMode::ManualArmed { .. }));
    }

    #[test]
    fn pin_and_sweep_transitions() {
        let mut machine = ModeMachine::new(DELAY, true);
        assert!(machine.pin());
        assert!(machine.lock_frequency());
        assert!(!machine.frequency_follows_user());
        assert!(!machine.begin_interaction(Instant::now()));

        assert!(machine.start_sweep());
        assert!(!machine.lock_frequency());
        assert!(machine.sweeping());
        assert!(machine.recording());
        assert!(!machine.callback_writes());
        assert!(!machine.pin());
        assert!(!machine.end_interaction());

        assert!(machine.finish_sweep());
        assert_eq!(machine.mode(), MeasurementMode::Idle);
    }

    #[test]
    fn sweep_cannot_start_during_manual_interaction() {
        let mut machine = ModeMachine::new(DELAY, true);
        machine.begin_interaction(Instant::now());
        assert!(!machine.start_sweep());
    }

    #[test]
    fn at_most_one_writer_in_every_mode() {
        let t0 = Instant::now();
        let modes = [
            MeasurementMode::Idle,
            MeasurementMode::ManualArmed { since: t0 },
            MeasurementMode::ManualRecording,
            MeasurementMode::LockedRecording,
            MeasurementMode::Sweeping,
        ];
        for mode in modes {
            let machine = ModeMachine {
                mode,
                arm_delay: DELAY,
                recording_enabled: true,
            };
            let writers = [
                machine.callback_writes() && !machine.lock_frequency(),
                machine.lock_frequency(),
                machine.sweeping(),
            ];
            assert!(writers.iter().filter(|&&w| w).count() <= 1, "{mode}");
        }
    }
}
