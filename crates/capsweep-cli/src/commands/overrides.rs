use std::path::PathBuf;

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use clap::{value_parser, Arg, ArgAction, Args, Command};

/// Inputs shared by the test programs a sweep invokes.
#[derive(Args, Debug)]
pub struct TestProgramArgs {
    /// Sweep description; `uq.params` and `uq.param_<i>.name` are read from it.
    #[arg(long)]
    pub uq: PathBuf,
    /// Device database whose `device` subtree builds the device.
    #[arg(long)]
    pub device: PathBuf,
    /// Sampled values as `--param_0 v0 --param_1 v1 ...`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "--param_i v_i")]
    pub params: Vec<String>,
}

/// Runtime command declaring one required numeric `--param_<i>` per parameter.
fn param_command(program: &str, count: usize) -> Command {
    (0..count).fold(
        Command::new("capsweep")
            .bin_name(format!("capsweep {program}"))
            .no_binary_name(true)
            .disable_help_flag(true),
        |command, index| {
            command.arg(
                Arg::new(format!("param_{index}"))
                    .long(format!("param_{index}"))
                    .value_name(format!("val_{index}"))
                    .required(true)
                    .action(ArgAction::Set)
                    .value_parser(value_parser!(f64))
                    .allow_negative_numbers(true),
            )
        },
    )
}

/// First paragraph of a clap diagnostic, on one line.
fn clap_message(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    let first = rendered.split("\n\n").next().unwrap_or_default();
    first
        .trim_start_matches("error:")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses exactly one numeric `--param_<i>` value for every `i < count`.
///
/// Both `--param_0 1.5` and `--param_0=1.5` are accepted.
pub fn parse_param_overrides(
    program: &str,
    args: &[String],
    count: usize,
) -> Result<Vec<f64>, CapError> {
    let mut command = param_command(program, count);
    let usage = command.render_usage().to_string();
    let usage_error = |message: String, kind: String| {
        CapError::Config(
            ErrorInfo::new("cli.usage", message)
                .with_context("kind", kind)
                .with_hint(usage.trim().to_string()),
        )
    };
    let matches = command
        .try_get_matches_from(args)
        .map_err(|err| usage_error(clap_message(&err), format!("{:?}", err.kind())))?;
    (0..count)
        .map(|index| {
            matches
                .get_one::<f64>(&format!("param_{index}"))
                .copied()
                .ok_or_else(|| {
                    usage_error(
                        format!("missing --param_{index}"),
                        "MissingRequiredArgument".to_string(),
                    )
                })
        })
        .collect()
}

/// Overrides each `uq.param_<i>.name` path of `device` with its sampled value.
///
/// Every path must already exist in the device database.
pub fn apply_overrides(
    program: &str,
    uq: &PropertyTree,
    device: &mut PropertyTree,
    args: &[String],
) -> Result<(), CapError> {
    let count = uq.get_int("uq.params")?;
    let count = usize::try_from(count).map_err(|_| {
        CapError::Config(
            ErrorInfo::new("uq.invalid_params", "parameter count must be non-negative")
                .with_context("params", count.to_string()),
        )
    })?;
    let values = parse_param_overrides(program, args, count)?;
    for (index, value) in values.into_iter().enumerate() {
        let path = uq.get_string(&format!("uq.param_{index}.name"))?;
        let previous = device.get_double(&path)?;
        device.put_double(&path, value)?;
        tracing::info!(param = index, path = %path, previous, value, "override applied");
    }
    Ok(())
}

/// Loads the uq and device databases and applies the command-line overrides
/// given to the `program` subcommand.
pub fn load_device_database(
    program: &str,
    args: &TestProgramArgs,
) -> Result<PropertyTree, CapError> {
    let uq = PropertyTree::load(&args.uq)?;
    let mut device = PropertyTree::load(&args.device)?;
    apply_overrides(program, &uq, &mut device, &args.params)?;
    Ok(device)
}
