//! Simulated current-sensor ADC for running the station off-hardware.
//!
//! Models a clamp-style current sensor on a 12-bit ADC:
//! - Mid-scale bias (the sensor's zero-current output)
//! - 50 Hz mains waveform whose amplitude follows the pump relay
//! - Per-reading ADC electronic noise
//! - Occasional spikes (sensor flakiness)

use std::cell::Cell;
use std::f64::consts::PI;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

use crate::sensor::{AnalogInput, SensorError, ADC_FULL_SCALE};

/// Mains frequency of the simulated supply.
const MAINS_HZ: f64 = 50.0;

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Simulation profiles selectable via the `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Pump draws a few amps; low noise, rare spikes.
    Nominal,
    /// Pump draws well above its rating, as with a seized impeller.
    Overload,
    /// Nominal load under heavy electrical noise and frequent spikes.
    Noisy,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "overload" => Self::Overload,
            "noisy" => Self::Noisy,
            _ => Self::Nominal,
        }
    }

    /// (peak counts under load, noise sigma, spike probability, spike sigma)
    fn params(self) -> (f64, f64, f32, f64) {
        match self {
            Self::Nominal => (250.0, 2.0, 0.001, 150.0),
            Self::Overload => (900.0, 2.0, 0.001, 150.0),
            Self::Noisy => (250.0, 12.0, 0.02, 400.0),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nominal => write!(f, "nominal"),
            Self::Overload => write!(f, "overload"),
            Self::Noisy => write!(f, "noisy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Analog input producing a synthetic sensor waveform.  The waveform phase
/// follows wall time so that the RMS window sees whole cycles.
pub struct SimulatedCurrent {
    pump_load: Rc<Cell<bool>>,
    started: Instant,
    mid: f64,
    peak: f64,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
}

impl SimulatedCurrent {
    /// `pump_load` is the shared flag from the mock board: the waveform
    /// appears only while the pump relay is on.
    pub fn new(scenario: Scenario, pump_load: Rc<Cell<bool>>) -> Self {
        let (peak, noise_sigma, spike_prob, spike_sigma) = scenario.params();
        Self {
            pump_load,
            started: Instant::now(),
            mid: (ADC_FULL_SCALE / 2.0).round(),
            peak,
            noise_sigma,
            spike_prob,
            spike_sigma,
        }
    }

    /// The reading at `t` seconds into the waveform.
    fn sample_at(&self, t: f64) -> u16 {
        let wave = if self.pump_load.get() {
            self.peak * (2.0 * PI * MAINS_HZ * t).sin()
        } else {
            0.0
        };

        let noise = gaussian(0.0, self.noise_sigma);

        let spike = if fastrand::f32() < self.spike_prob {
            gaussian(0.0, self.spike_sigma)
        } else {
            0.0
        };

        (self.mid + wave + noise + spike)
            .round()
            .clamp(0.0, ADC_FULL_SCALE) as u16
    }
}

impl AnalogInput for SimulatedCurrent {
    fn read_raw(&mut self) -> Result<u16, SensorError> {
        Ok(self.sample_at(self.started.elapsed().as_secs_f64()))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
