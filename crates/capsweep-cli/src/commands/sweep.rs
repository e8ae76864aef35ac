use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

use capsweep_core::CapError;
use capsweep_uq::{
    CancelToken, Dispatch, ExecutionBackend, PbsQueue, ProcessProgram, Sweep, SweepSetup,
};
use clap::Args;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// Sweep description (YAML with a top-level `uq` key).
    #[arg(long)]
    pub config: PathBuf,
    /// Output directory for `dataset.json`, `failures.json` and per-quantity CSVs.
    #[arg(long)]
    pub out: PathBuf,
    /// Print every resolved invocation without running anything.
    #[arg(long)]
    pub dry_run: bool,
    /// Directory for PBS job scripts and run outputs (defaults to `<out>/jobs`).
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

/// Absolute directory test programs run from on every backend, so relative
/// paths in the executable resolve next to the sweep description.
fn run_dir(config: &Path) -> Result<PathBuf, CapError> {
    let dir = config
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::canonicalize(dir).map_err(|err| CapError::io("sweep.config_dir", dir.display(), err))
}

pub fn run(args: &SweepArgs) -> Result<(), Box<dyn Error>> {
    let setup = SweepSetup::load(&args.config)?;
    let sweep = Sweep::from_setup(setup)?;

    if args.dry_run {
        for invocation in sweep.invocations()? {
            println!("{}", invocation.command);
        }
        return Ok(());
    }

    let run_dir = run_dir(&args.config)?;
    // Nothing cancels from the binary; interrupting the process ends the sweep.
    let cancel = CancelToken::new();
    let dataset = match sweep.backend() {
        ExecutionBackend::Interactive(_) => {
            let program = ProcessProgram::default().in_dir(run_dir);
            sweep.run(Dispatch::Local(&program), &cancel)?
        }
        ExecutionBackend::BatchQueue(host) => {
            let work_dir = args
                .work_dir
                .clone()
                .unwrap_or_else(|| args.out.join("jobs"));
            let queue = PbsQueue::new(host.clone(), work_dir).in_dir(run_dir);
            sweep.run(Dispatch::Queue(&queue), &cancel)?
        }
    };

    dataset.write_dataset(&args.out)?;
    println!(
        "{} of {} runs succeeded, {} failed; dataset written to {}",
        dataset.succeeded,
        dataset.header.planned,
        dataset.failed,
        args.out.display()
    );
    Ok(())
}
