//! Minimal time-stepping model of an energy-storage element.
//!
//! The model is a linear capacitor: under constant current `I` for a step `dt`
//! the voltage moves by `I * dt / C`. Constant-voltage control is recognised
//! but rejected with [`CapError::Unimplemented`].

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use serde::{Deserialize, Serialize};

/// Electrical state exposed by a device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Terminal voltage.
    pub voltage: f64,
    /// Current through the device.
    pub current: f64,
}

/// Control applied during one time step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum ControlMode {
    /// Impose the current, integrate the voltage.
    ConstantCurrent(f64),
    /// Impose the voltage. Not supported by the base model.
    ConstantVoltage(f64),
}

/// API the measurement collaborators drive a device through.
pub trait EnergyStorageDevice: Send {
    /// Advances one step with the current held at `constant_current`.
    fn evolve_one_time_step_constant_current(
        &mut self,
        time_step: f64,
        constant_current: f64,
    ) -> Result<(), CapError>;

    /// Advances one step with the voltage held at `constant_voltage`.
    fn evolve_one_time_step_constant_voltage(
        &mut self,
        time_step: f64,
        constant_voltage: f64,
    ) -> Result<(), CapError>;

    /// Current through the device.
    fn get_current(&self) -> f64;

    /// Terminal voltage.
    fn get_voltage(&self) -> f64;

    /// Dispatches one step according to `mode`.
    fn evolve(&mut self, time_step: f64, mode: ControlMode) -> Result<(), CapError> {
        match mode {
            ControlMode::ConstantCurrent(current) => {
                self.evolve_one_time_step_constant_current(time_step, current)
            }
            ControlMode::ConstantVoltage(voltage) => {
                self.evolve_one_time_step_constant_voltage(time_step, voltage)
            }
        }
    }
}

/// The stripped-down device used by the measurement test programs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomDevice {
    state: DeviceState,
    capacitance: f64,
}

impl CustomDevice {
    /// Builds a device at `initial_voltage` with zero current and unit capacitance.
    pub fn new(initial_voltage: f64) -> Self {
        Self {
            state: DeviceState {
                voltage: initial_voltage,
                current: 0.0,
            },
            capacitance: 1.0,
        }
    }

    /// Builds a device from a config subtree exposing `initial_voltage` and
    /// optionally `capacitance`.
    pub fn from_tree(tree: &PropertyTree) -> Result<Self, CapError> {
        let initial_voltage = tree.get_double("initial_voltage")?;
        let capacitance = tree.get_double_with_default_value("capacitance", 1.0)?;
        if !(capacitance > 0.0 && capacitance.is_finite()) {
            return Err(CapError::Config(
                ErrorInfo::new("device.invalid_capacitance", "capacitance must be positive")
                    .with_context("capacitance", capacitance.to_string()),
            ));
        }
        Ok(Self {
            capacitance,
            ..Self::new(initial_voltage)
        })
    }

    /// Returns a snapshot of the electrical state.
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Capacitance used by the voltage integration.
    pub fn capacitance(&self) -> f64 {
        self.capacitance
    }
}

fn check_time_step(time_step: f64) -> Result<(), CapError> {
    if time_step > 0.0 && time_step.is_finite() {
        Ok(())
    } else {
        Err(CapError::Device(
            ErrorInfo::new("device.invalid_time_step", "time step must be positive")
                .with_context("time_step", time_step.to_string()),
        ))
    }
}

impl EnergyStorageDevice for CustomDevice {
    fn evolve_one_time_step_constant_current(
        &mut self,
        time_step: f64,
        constant_current: f64,
    ) -> Result<(), CapError> {
        check_time_step(time_step)?;
        self.state.current = constant_current;
        self.state.voltage += constant_current * time_step / self.capacitance;
        Ok(())
    }

    fn evolve_one_time_step_constant_voltage(
        &mut self,
        _time_step: f64,
        constant_voltage: f64,
    ) -> Result<(), CapError> {
        Err(CapError::Unimplemented(
            ErrorInfo::new(
                "device.unimplemented_mode",
                "constant voltage stepping is not implemented",
            )
            .with_context("voltage", constant_voltage.to_string()),
        ))
    }

    fn get_current(&self) -> f64 {
        self.state.current
    }

    fn get_voltage(&self) -> f64 {
        self.state.voltage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_current_integrates_voltage() {
        let mut device = CustomDevice::new(1.0);
        device
            .evolve_one_time_step_constant_current(1.0, 2.0)
            .unwrap();
        assert_eq!(device.get_current(), 2.0);
        assert_eq!(device.get_voltage(), 3.0);
    }

    #[test]
    fn constant_voltage_is_rejected_without_touching_state() {
        let mut device = CustomDevice::new(1.0);
        let err = device.evolve(0.5, ControlMode::ConstantVoltage(2.0)).unwrap_err();
        assert!(matches!(err, CapError::Unimplemented(_)));
        assert_eq!(device.state(), DeviceState { voltage: 1.0, current: 0.0 });
    }

    #[test]
    fn non_positive_time_step_is_refused() {
        let mut device = CustomDevice::new(0.0);
        let err = device
            .evolve_one_time_step_constant_current(0.0, 1.0)
            .unwrap_err();
        assert_eq!(err.info().code, "device.invalid_time_step");
    }
}
