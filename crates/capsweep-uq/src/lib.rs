//! Parameter sweep orchestration for uncertainty quantification of
//! energy-storage devices.

mod dataset;
mod hosts;
mod parameters;
mod program;
mod queue;
mod runner;
pub mod sampling;
mod setup;
mod sweep;

pub use dataset::{AggregateDataset, DatasetHeader, RunFailure, RunResult};
pub use hosts::{ExecutionBackend, InteractiveHost, PbsHost};
pub use parameters::{
    build_parameters, parameters_from_tree, Distribution, Parameter, ParameterDescriptor,
};
pub use program::{Invocation, ProgramDescriptor, PLACEHOLDER_SIGIL};
pub use queue::{parse_qstat_state, BatchJob, JobHandle, JobPoll, JobQueue, PbsQueue};
pub use runner::{collect_output, FnProgram, ProcessProgram, RawOutput, TestProgram};
pub use sampling::{
    SamplingMethod, SamplingPlan, SamplingSettings, SamplingStrategy, MAX_SMOLYAK_LEVEL,
};
pub use setup::SweepSetup;
pub use sweep::{CancelToken, Dispatch, Sweep};
