//! Derived quantities of a complex impedance measurement.

use capsweep_core::{CapError, ResultSink};
use num_complex::Complex64;

use crate::impedance::ImpedanceSpectrum;

/// Names under which [`ImpedanceQuantities::report`] stores its arrays.
pub const QUANTITY_NAMES: [&str; 6] = [
    "frequency",
    "resistance",
    "reactance",
    "modulus",
    "argument",
    "magnitude",
];

/// Elementwise transforms of an impedance spectrum.
///
/// Zero or non-finite impedances propagate to non-finite outputs (for example
/// a zero modulus gives a magnitude of `-inf`); nothing is clamped.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ImpedanceQuantities {
    pub frequency: Vec<f64>,
    /// Real part, ohms.
    pub resistance: Vec<f64>,
    /// Imaginary part, ohms.
    pub reactance: Vec<f64>,
    /// Absolute value, ohms.
    pub modulus: Vec<f64>,
    /// Phase angle in degrees.
    pub argument: Vec<f64>,
    /// `20 log10(modulus)`, dB.
    pub magnitude: Vec<f64>,
}

pub fn resistance(z: Complex64) -> f64 {
    z.re
}

pub fn reactance(z: Complex64) -> f64 {
    z.im
}

pub fn modulus(z: Complex64) -> f64 {
    z.norm()
}

pub fn argument_degrees(z: Complex64) -> f64 {
    z.arg().to_degrees()
}

pub fn magnitude_db(z: Complex64) -> f64 {
    20.0 * z.norm().log10()
}

impl ImpedanceQuantities {
    /// Applies every transform to the spectrum.
    pub fn from_spectrum(spectrum: &ImpedanceSpectrum) -> Self {
        let map = |f: fn(Complex64) -> f64| -> Vec<f64> {
            spectrum.impedance.iter().copied().map(f).collect()
        };
        Self {
            frequency: spectrum.frequency.clone(),
            resistance: map(resistance),
            reactance: map(reactance),
            modulus: map(modulus),
            argument: map(argument_degrees),
            magnitude: map(magnitude_db),
        }
    }

    /// Pairs each quantity with its stored name.
    pub fn named(&self) -> [(&'static str, &[f64]); 6] {
        [
            (QUANTITY_NAMES[0], self.frequency.as_slice()),
            (QUANTITY_NAMES[1], self.resistance.as_slice()),
            (QUANTITY_NAMES[2], self.reactance.as_slice()),
            (QUANTITY_NAMES[3], self.modulus.as_slice()),
            (QUANTITY_NAMES[4], self.argument.as_slice()),
            (QUANTITY_NAMES[5], self.magnitude.as_slice()),
        ]
    }

    /// Stores every quantity in the sink, one call per name.
    pub fn report(&self, sink: &mut dyn ResultSink) -> Result<(), CapError> {
        for (name, values) in self.named() {
            sink.store(name, values)?;
        }
        Ok(())
    }
}
