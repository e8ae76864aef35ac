use capsweep_core::{CapError, ErrorInfo, PropertyTree, ResultSink};
use serde::{Deserialize, Serialize};

use crate::device::{ControlMode, EnergyStorageDevice};

/// Fixed-step operating schedule read from the `operation` subtree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub mode: ControlMode,
    pub time_step: f64,
    pub steps: usize,
}

/// Device history sampled after every step, initial state first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trace {
    pub time: Vec<f64>,
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
}

impl Operation {
    /// Reads `mode` (`constant_current` or `constant_voltage`), `time_step`,
    /// `steps` and the matching `current` or `voltage` setpoint.
    pub fn from_tree(tree: &PropertyTree) -> Result<Self, CapError> {
        let token = tree.get_string("mode")?;
        let mode = match token.as_str() {
            "constant_current" => ControlMode::ConstantCurrent(tree.get_double("current")?),
            "constant_voltage" => ControlMode::ConstantVoltage(tree.get_double("voltage")?),
            other => {
                return Err(CapError::Unsupported(
                    ErrorInfo::new("device.unsupported_mode", format!("invalid operating mode {other}"))
                        .with_context("mode", other)
                        .with_hint("expected constant_current or constant_voltage"),
                ))
            }
        };
        let steps = tree.get_int("steps")?;
        let steps = usize::try_from(steps).map_err(|_| {
            CapError::Config(
                ErrorInfo::new("device.negative_steps", "steps must be non-negative")
                    .with_context("steps", steps.to_string()),
            )
        })?;
        Ok(Self {
            mode,
            time_step: tree.get_double("time_step")?,
            steps,
        })
    }

    /// Steps `device` through the schedule, stopping at the first failed step.
    pub fn run(&self, device: &mut dyn EnergyStorageDevice) -> Result<Trace, CapError> {
        let mut trace = Trace::default();
        trace.record(0.0, device);
        for step in 1..=self.steps {
            device.evolve(self.time_step, self.mode)?;
            trace.record(step as f64 * self.time_step, device);
        }
        Ok(trace)
    }
}

impl Trace {
    fn record(&mut self, time: f64, device: &dyn EnergyStorageDevice) {
        self.time.push(time);
        self.voltage.push(device.get_voltage());
        self.current.push(device.get_current());
    }

    /// Stores `time`, `voltage` and `current`.
    pub fn report(&self, sink: &mut dyn ResultSink) -> Result<(), CapError> {
        sink.store("time", &self.time)?;
        sink.store("voltage", &self.voltage)?;
        sink.store("current", &self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CustomDevice;

    #[test]
    fn constant_current_schedule_is_traced() {
        let tree = PropertyTree::parse_str(
            "mode: constant_current\ncurrent: 2.0\ntime_step: 1.0\nsteps: 2\n",
        )
        .unwrap();
        let operation = Operation::from_tree(&tree).unwrap();
        let mut device = CustomDevice::new(1.0);
        let trace = operation.run(&mut device).unwrap();
        assert_eq!(trace.time, vec![0.0, 1.0, 2.0]);
        assert_eq!(trace.voltage, vec![1.0, 3.0, 5.0]);
        assert_eq!(trace.current, vec![0.0, 2.0, 2.0]);
    }

    #[test]
    fn constant_voltage_schedule_is_unimplemented() {
        let tree = PropertyTree::parse_str(
            "mode: constant_voltage\nvoltage: 2.0\ntime_step: 1.0\nsteps: 2\n",
        )
        .unwrap();
        let operation = Operation::from_tree(&tree).unwrap();
        let err = operation.run(&mut CustomDevice::new(1.0)).unwrap_err();
        assert!(matches!(err, CapError::Unimplemented(_)));
    }

    #[test]
    fn unknown_mode_is_unsupported() {
        let tree = PropertyTree::parse_str("mode: galvanostatic\ntime_step: 1.0\nsteps: 1\n").unwrap();
        let err = Operation::from_tree(&tree).unwrap_err();
        assert_eq!(err.info().code, "device.unsupported_mode");
    }
}
