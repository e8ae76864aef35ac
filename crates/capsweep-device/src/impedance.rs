//! Boundary to the impedance-spectroscopy collaborator.
//!
//! The real measurement routine lives outside this workspace. The
//! [`SeriesRcAnalyzer`] stand-in infers the device capacitance from a probing
//! current pulse and evaluates an ideal series RC spectrum; no signal is
//! injected or transformed.

use std::f64::consts::PI;

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::device::EnergyStorageDevice;

/// Frequency-domain measurement of one device.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImpedanceSpectrum {
    /// Excitation frequencies in Hz.
    pub frequency: Vec<f64>,
    /// Complex impedance at each frequency, in ohms.
    pub impedance: Vec<Complex64>,
}

impl ImpedanceSpectrum {
    /// Number of frequency points.
    pub fn len(&self) -> usize {
        self.frequency.len()
    }

    /// True when no point was measured.
    pub fn is_empty(&self) -> bool {
        self.frequency.is_empty()
    }

    /// Iterates over `(frequency, impedance)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, Complex64)> + '_ {
        self.frequency.iter().copied().zip(self.impedance.iter().copied())
    }
}

/// Measures the impedance spectrum of a device.
pub trait ImpedanceAnalyzer {
    /// Runs the measurement; the device may be stepped while probing.
    fn measure(&self, device: &mut dyn EnergyStorageDevice) -> Result<ImpedanceSpectrum, CapError>;
}

/// Largest frequency grid a spectrum may be evaluated on.
pub const MAX_FREQUENCY_POINTS: usize = 1_000_000;

/// Frequency grid and excitation settings read from the `eis` config subtree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EisSettings {
    /// Lowest frequency in Hz.
    pub frequency_lower_limit: f64,
    /// Highest frequency in Hz.
    pub frequency_upper_limit: f64,
    /// Logarithmically spaced points per decade.
    pub steps_per_decade: usize,
    /// Current used by the capacitance measurement.
    pub excitation_current: f64,
    /// Duration of each excitation step.
    pub excitation_time_step: f64,
}

impl EisSettings {
    /// Reads the settings, validating the frequency range.
    pub fn from_tree(tree: &PropertyTree) -> Result<Self, CapError> {
        let settings = Self {
            frequency_lower_limit: tree.get_double("frequency_lower_limit")?,
            frequency_upper_limit: tree.get_double("frequency_upper_limit")?,
            steps_per_decade: tree.get_int("steps_per_decade")?.max(0) as usize,
            excitation_current: tree.get_double_with_default_value("excitation_current", 1.0)?,
            excitation_time_step: tree.get_double_with_default_value("excitation_time_step", 1.0e-3)?,
        };
        let (lower, upper) = (settings.frequency_lower_limit, settings.frequency_upper_limit);
        let valid_range = lower.is_finite() && upper.is_finite() && lower > 0.0 && upper >= lower;
        let valid_steps = settings.steps_per_decade > 0
            && (upper / lower).log10() * (settings.steps_per_decade as f64)
                < MAX_FREQUENCY_POINTS as f64;
        if !valid_range || !valid_steps {
            return Err(CapError::Config(
                ErrorInfo::new("eis.invalid_range", "invalid frequency grid")
                    .with_context("lower", settings.frequency_lower_limit.to_string())
                    .with_context("upper", settings.frequency_upper_limit.to_string())
                    .with_context("steps_per_decade", settings.steps_per_decade.to_string()),
            ));
        }
        Ok(settings)
    }

    /// Logarithmically spaced frequencies from the lower limit up to the upper limit.
    pub fn frequencies(&self) -> Vec<f64> {
        let decades = (self.frequency_upper_limit / self.frequency_lower_limit).log10();
        let per_decade = self.steps_per_decade as f64;
        let total = (per_decade * decades).round() as usize + 1;
        (0..total)
            .map(|i| self.frequency_lower_limit * 10.0_f64.powf(i as f64 / per_decade))
            .collect()
    }
}

/// Ideal series resistor + capacitor analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesRcAnalyzer {
    settings: EisSettings,
    series_resistance: f64,
}

impl SeriesRcAnalyzer {
    /// Creates an analyzer with the given grid and equivalent series resistance.
    pub fn new(settings: EisSettings, series_resistance: f64) -> Self {
        Self {
            settings,
            series_resistance,
        }
    }

    fn measure_capacitance(&self, device: &mut dyn EnergyStorageDevice) -> Result<f64, CapError> {
        let current = self.settings.excitation_current;
        let dt = self.settings.excitation_time_step;
        let before = device.get_voltage();
        device.evolve_one_time_step_constant_current(dt, current)?;
        let after = device.get_voltage();
        // Reverse pulse restores the voltage of a linear device.
        device.evolve_one_time_step_constant_current(dt, -current)?;
        let delta = after - before;
        if delta == 0.0 || !delta.is_finite() {
            return Err(CapError::Device(
                ErrorInfo::new("eis.no_response", "device voltage did not respond to the excitation")
                    .with_context("excitation_current", current.to_string()),
            ));
        }
        Ok(current * dt / delta)
    }
}

impl ImpedanceAnalyzer for SeriesRcAnalyzer {
    fn measure(&self, device: &mut dyn EnergyStorageDevice) -> Result<ImpedanceSpectrum, CapError> {
        let capacitance = self.measure_capacitance(device)?;
        let frequency = self.settings.frequencies();
        let _span = tracing::debug_span!("eis", points = frequency.len(), capacitance).entered();
        let impedance = frequency
            .iter()
            .map(|f| {
                let omega = 2.0 * PI * f;
                Complex64::new(self.series_resistance, -1.0 / (omega * capacitance))
            })
            .collect();
        Ok(ImpedanceSpectrum {
            frequency,
            impedance,
        })
    }
}
