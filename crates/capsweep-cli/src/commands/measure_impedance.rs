use std::error::Error;
use std::path::PathBuf;

use capsweep_core::{PropertyTree, StdoutSink};
use capsweep_device::{
    CustomDevice, EisSettings, ImpedanceAnalyzer, ImpedanceQuantities, SeriesRcAnalyzer,
};
use clap::Args;

use super::overrides::{load_device_database, TestProgramArgs};

#[derive(Args, Debug)]
pub struct MeasureImpedanceArgs {
    #[command(flatten)]
    pub common: TestProgramArgs,
    /// Spectroscopy settings; the `eis` subtree is read.
    #[arg(long)]
    pub eis: PathBuf,
}

pub fn run(args: &MeasureImpedanceArgs) -> Result<(), Box<dyn Error>> {
    let database = load_device_database("measure-impedance", &args.common)?;
    let device_tree = database.get_child("device")?;
    let mut device = CustomDevice::from_tree(&device_tree)?;
    let series_resistance = device_tree.get_double_with_default_value("series_resistance", 0.0)?;

    let eis = PropertyTree::load(&args.eis)?.get_child("eis")?;
    let analyzer = SeriesRcAnalyzer::new(EisSettings::from_tree(&eis)?, series_resistance);
    let spectrum = analyzer.measure(&mut device)?;
    tracing::info!(points = spectrum.len(), "impedance spectrum measured");

    ImpedanceQuantities::from_spectrum(&spectrum).report(&mut StdoutSink::stdout())?;
    Ok(())
}
