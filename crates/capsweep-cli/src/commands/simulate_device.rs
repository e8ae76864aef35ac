use std::error::Error;

use capsweep_core::StdoutSink;
use capsweep_device::{CustomDevice, Operation};
use clap::Args;

use super::overrides::{load_device_database, TestProgramArgs};

#[derive(Args, Debug)]
pub struct SimulateDeviceArgs {
    #[command(flatten)]
    pub common: TestProgramArgs,
}

pub fn run(args: &SimulateDeviceArgs) -> Result<(), Box<dyn Error>> {
    let database = load_device_database("simulate-device", &args.common)?;
    let mut device = CustomDevice::from_tree(&database.get_child("device")?)?;
    let operation = Operation::from_tree(&database.get_child("operation")?)?;
    let trace = operation.run(&mut device)?;
    tracing::info!(steps = operation.steps, voltage = device.state().voltage, "simulation finished");
    trace.report(&mut StdoutSink::stdout())?;
    Ok(())
}
