use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    measure_impedance::{self, MeasureImpedanceArgs},
    simulate_device::{self, SimulateDeviceArgs},
    sweep::{self, SweepArgs},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "capsweep", about = "UQ parameter sweeps over energy-storage device models")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sample the uncertain parameters and run the test program for every assignment.
    Sweep(SweepArgs),
    /// Test program: measure the impedance spectrum of the overridden device.
    MeasureImpedance(MeasureImpedanceArgs),
    /// Test program: step the overridden device through its `operation` schedule.
    SimulateDevice(SimulateDeviceArgs),
}

/// Logs go to stderr; stdout carries result lines only.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::Sweep(args) => sweep::run(&args),
        Command::MeasureImpedance(args) => measure_impedance::run(&args),
        Command::SimulateDevice(args) => simulate_device::run(&args),
    }
}
