//! Idealized energy-storage device and impedance result extraction for capsweep
//! test programs.

/// Device state machine and the collaborator-facing trait.
pub mod device;
/// Derived impedance quantities and their reporting.
pub mod extract;
/// Impedance measurement boundary.
pub mod impedance;
/// Fixed-step operating schedules.
pub mod operation;

pub use device::{ControlMode, CustomDevice, DeviceState, EnergyStorageDevice};
pub use extract::{ImpedanceQuantities, QUANTITY_NAMES};
pub use impedance::{EisSettings, ImpedanceAnalyzer, ImpedanceSpectrum, SeriesRcAnalyzer};
pub use operation::{Operation, Trace};
