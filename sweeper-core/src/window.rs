//! Window functions for the live spectrum.
//!
//! The selectable windows form a closed set. Each variant dispatches to a
//! coefficient function; [`WindowFunction::generate`] pre-computes the whole
//! table once so the analyzer never evaluates trig per frame.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Window function applied to the FFT input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowFunction {
    /// No windowing, maximum frequency resolution.
    Rectangular,
    /// Raised cosine, the general purpose choice.
    #[default]
    Hann,
    /// Better first sidelobe than Hann.
    Hamming,
    /// Strong sidelobe suppression, wider main lobe.
    Blackman,
    /// Triangular window.
    Bartlett,
}

type Coefficient = fn(f32) -> f32;

/// Coefficient generators indexed by [`WindowFunction::index`]. The argument is
/// the normalized position `i / (n - 1)` in `[0, 1]`.
const GENERATORS: [Coefficient; 5] = [rectangular, hann, hamming, blackman, bartlett];

fn rectangular(_position: f32) -> f32 {
    1.0
}

fn hann(position: f32) -> f32 {
    0.5 * (1.0 - (2.0 * PI * position).cos())
}

fn hamming(position: f32) -> f32 {
    0.54 - 0.46 * (2.0 * PI * position).cos()
}

fn blackman(position: f32) -> f32 {
    0.42 - 0.5 * (2.0 * PI * position).cos() + 0.08 * (4.0 * PI * position).cos()
}

fn bartlett(position: f32) -> f32 {
    1.0 - (2.0 * position - 1.0).abs()
}

impl WindowFunction {
    pub const ALL: [WindowFunction; 5] = [
        WindowFunction::Rectangular,
        WindowFunction::Hann,
        WindowFunction::Hamming,
        WindowFunction::Blackman,
        WindowFunction::Bartlett,
    ];

    /// Position in [`WindowFunction::ALL`], also used as the atomic encoding.
    pub fn index(self) -> u8 {
        match self {
            Self::Rectangular => 0,
            Self::Hann => 1,
            Self::Hamming => 2,
            Self::Blackman => 3,
            Self::Bartlett => 4,
        }
    }

    /// Inverse of [`WindowFunction::index`]; unknown values fall back to Hann.
    pub fn from_index(index: u8) -> Self {
        Self::ALL
            .get(index as usize)
            .copied()
            .unwrap_or(WindowFunction::Hann)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rectangular => "rectangular",
            Self::Hann => "hann",
            Self::Hamming => "hamming",
            Self::Blackman => "blackman",
            Self::Bartlett => "bartlett",
        }
    }

    /// Generates the symmetric window of `size` coefficients.
    ///
    /// Edge coefficients of the tapered windows are 0, the centre is 1.
    pub fn generate(self, size: usize) -> Vec<f32> {
        let coefficient = GENERATORS[self.index() as usize];
        if size == 1 {
            return vec![1.0];
        }
        let last = (size.saturating_sub(1)) as f32;
        (0..size).map(|i| coefficient(i as f32 / last)).collect()
    }
}

impl fmt::Display for WindowFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowFunction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rectangular" | "rect" | "none" => Ok(Self::Rectangular),
            "hann" | "hanning" => Ok(Self::Hann),
            "hamming" => Ok(Self::Hamming),
            "blackman" => Ok(Self::Blackman),
            "bartlett" | "bartlette" | "triangular" => Ok(Self::Bartlett),
            other => Err(anyhow::anyhow!("unknown window function '{}'", other)),
        }
    }
}
