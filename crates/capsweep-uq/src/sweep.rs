//! Sweep orchestrator: resolves the plan into invocations, dispatches them to
//! the selected backend and assembles the aggregate dataset.
//!
//! Per-run failures are recorded and never abort the sweep; a backend that
//! refuses a submission aborts it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use capsweep_core::{stable_hash_string, CapError, ErrorInfo};

use crate::dataset::{AggregateDataset, DatasetHeader};
use crate::hosts::{ExecutionBackend, InteractiveHost, PbsHost};
use crate::parameters::Parameter;
use crate::program::{Invocation, ProgramDescriptor};
use crate::queue::{BatchJob, JobHandle, JobPoll, JobQueue};
use crate::runner::{RawOutput, TestProgram};
use crate::sampling::{SamplingPlan, SamplingSettings};
use crate::setup::SweepSetup;

type Outcome = (Invocation, Result<RawOutput, CapError>);

/// Shared flag stopping a sweep from starting further work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; already running work is drained, not killed.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Capability matching the sweep's execution backend.
#[derive(Clone, Copy)]
pub enum Dispatch<'a> {
    /// Runs invocations on local worker threads (Interactive backend).
    Local(&'a dyn TestProgram),
    /// Submits invocations as jobs (BatchQueue backend).
    Queue(&'a dyn JobQueue),
}

impl Dispatch<'_> {
    fn label(&self) -> &'static str {
        match self {
            Dispatch::Local(_) => "local",
            Dispatch::Queue(_) => "queue",
        }
    }
}

/// A fully set up sweep with its generated sampling plan.
#[derive(Debug, Clone)]
pub struct Sweep {
    parameters: Vec<Parameter>,
    settings: SamplingSettings,
    plan: SamplingPlan,
    backend: ExecutionBackend,
    program: ProgramDescriptor,
    plan_hash: String,
}

impl Sweep {
    /// Generates the sampling plan; fails before anything is dispatched.
    pub fn new(
        parameters: Vec<Parameter>,
        settings: SamplingSettings,
        backend: ExecutionBackend,
        program: ProgramDescriptor,
    ) -> Result<Self, CapError> {
        let strategy = settings.strategy();
        let plan = strategy.generate(&parameters)?;
        let plan_hash = stable_hash_string(&(&parameters, &settings))?;
        tracing::info!(
            method = strategy.label(),
            points = plan.len(),
            plan_hash = %plan_hash,
            "sampling plan generated"
        );
        Ok(Self {
            parameters,
            settings,
            plan,
            backend,
            program,
            plan_hash,
        })
    }

    pub fn from_setup(setup: SweepSetup) -> Result<Self, CapError> {
        Self::new(setup.parameters, setup.settings, setup.backend, setup.program)
    }

    pub fn plan(&self) -> &SamplingPlan {
        &self.plan
    }

    pub fn backend(&self) -> &ExecutionBackend {
        &self.backend
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn plan_hash(&self) -> &str {
        &self.plan_hash
    }

    /// Resolves every assignment vector into a command line, in plan order.
    pub fn invocations(&self) -> Result<Vec<Invocation>, CapError> {
        self.plan
            .iter()
            .enumerate()
            .map(|(index, assignment)| self.program.invocation(index, assignment))
            .collect()
    }

    fn header(&self) -> DatasetHeader {
        DatasetHeader {
            plan_hash: self.plan_hash.clone(),
            backend: self.backend.label().to_string(),
            parameters: self.parameters.clone(),
            settings: self.settings,
            planned: self.plan.len(),
        }
    }

    /// Runs the sweep to completion or cancellation.
    pub fn run(&self, dispatch: Dispatch<'_>, cancel: &CancelToken) -> Result<AggregateDataset, CapError> {
        let invocations = self.invocations()?;
        let span = tracing::info_span!(
            "sweep",
            runs = invocations.len(),
            backend = self.backend.label(),
            concurrency = self.backend.concurrency()
        );
        let _guard = span.enter();

        let outcomes = match (&self.backend, dispatch) {
            (ExecutionBackend::Interactive(host), Dispatch::Local(program)) => {
                run_interactive(host, program, invocations, cancel)?
            }
            (ExecutionBackend::BatchQueue(host), Dispatch::Queue(queue)) => {
                let prefix = format!("capsweep_{}", &self.plan_hash[..8.min(self.plan_hash.len())]);
                run_batch(host, queue, &prefix, invocations, cancel)?
            }
            (backend, dispatch) => {
                return Err(CapError::Config(
                    ErrorInfo::new("sweep.dispatch_mismatch", "dispatch does not fit the configured host")
                        .with_context("backend", backend.label())
                        .with_context("dispatch", dispatch.label()),
                ))
            }
        };

        let dataset = AggregateDataset::assemble(self.header(), outcomes, cancel.is_cancelled());
        for failure in &dataset.failures {
            tracing::warn!(
                run = failure.index,
                assignment = ?failure.assignment,
                error = %failure.error,
                "run failed"
            );
        }
        tracing::info!(
            succeeded = dataset.succeeded,
            failed = dataset.failed,
            skipped = dataset.skipped,
            cancelled = dataset.cancelled,
            "sweep finished"
        );
        Ok(dataset)
    }
}

/// Worker pool of exactly `host.workers()` threads, runs started in plan order.
fn run_interactive(
    host: &InteractiveHost,
    program: &dyn TestProgram,
    invocations: Vec<Invocation>,
    cancel: &CancelToken,
) -> Result<Vec<Outcome>, CapError> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(host.workers())
        .build()
        .map_err(|err| CapError::Submission(ErrorInfo::new("sweep.thread_pool", err.to_string())))?;
    let collected = Mutex::new(Vec::with_capacity(invocations.len()));

    pool.scope_fifo(|scope| {
        for invocation in invocations {
            let collected = &collected;
            scope.spawn_fifo(move |_| {
                if cancel.is_cancelled() {
                    return;
                }
                tracing::debug!(run = invocation.index, command = %invocation.command, "starting run");
                let outcome = program.run(&invocation);
                collected
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((invocation, outcome));
            });
        }
    });

    Ok(collected.into_inner().unwrap_or_else(PoisonError::into_inner))
}

/// Submits packed jobs while fewer than `qlimit` are outstanding and polls
/// until every submitted job has finished.
fn run_batch(
    host: &PbsHost,
    queue: &dyn JobQueue,
    prefix: &str,
    invocations: Vec<Invocation>,
    cancel: &CancelToken,
) -> Result<Vec<Outcome>, CapError> {
    let mut pending: VecDeque<Invocation> = invocations.into();
    let mut outstanding: Vec<(JobHandle, BatchJob)> = Vec::new();
    let mut outcomes = Vec::with_capacity(pending.len());
    let mut submitted = 0usize;

    loop {
        let mut progressed = false;
        while !cancel.is_cancelled() && !pending.is_empty() && outstanding.len() < host.queue_limit() {
            let take = host.pack_size().min(pending.len());
            let job = BatchJob {
                name: format!("{prefix}_{submitted:04}"),
                invocations: pending.drain(..take).collect(),
            };
            let handle = queue.submit(&job)?;
            tracing::debug!(job = %job.name, id = %handle.id, runs = job.invocations.len(), "job submitted");
            submitted += 1;
            outstanding.push((handle, job));
            progressed = true;
        }
        if outstanding.is_empty() {
            break;
        }

        let mut still_running = Vec::with_capacity(outstanding.len());
        for (handle, job) in outstanding.drain(..) {
            match queue.poll(&handle, &job) {
                Ok(JobPoll::Pending) => still_running.push((handle, job)),
                Ok(JobPoll::Finished(results)) => {
                    progressed = true;
                    let mut results = results.into_iter();
                    for invocation in job.invocations {
                        let outcome = results.next().unwrap_or_else(|| {
                            Err(CapError::Invocation(
                                ErrorInfo::new("run.missing_outcome", "job reported no outcome for run")
                                    .with_context("run", invocation.index.to_string())
                                    .with_context("job", handle.id.clone()),
                            ))
                        });
                        outcomes.push((invocation, outcome));
                    }
                }
                Err(err) => {
                    progressed = true;
                    tracing::warn!(job = %job.name, id = %handle.id, error = %err, "job poll failed");
                    for invocation in job.invocations {
                        outcomes.push((invocation, Err(err.clone())));
                    }
                }
            }
        }
        outstanding = still_running;

        if !progressed && !outstanding.is_empty() {
            thread::sleep(host.poll_interval());
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::PbsHost;
    use crate::parameters::Distribution;
    use crate::runner::FnProgram;
    use crate::sampling::SamplingMethod;

    fn sweep(backend: ExecutionBackend, samples: usize) -> Sweep {
        let parameters = vec![Parameter {
            id: Parameter::id_for(0),
            name: "device.capacitance".to_string(),
            distribution: Distribution::Uniform { min: 1.0, max: 2.0 },
        }];
        let program = ProgramDescriptor::new("measure", "stub", &parameters);
        Sweep::new(
            parameters,
            SamplingSettings {
                method: SamplingMethod::MonteCarlo { samples },
                seed: 3,
            },
            backend,
            program,
        )
        .expect("sweep")
    }

    #[test]
    fn invocations_follow_plan_order() {
        let sweep = sweep(ExecutionBackend::Interactive(InteractiveHost::default()), 3);
        let invocations = sweep.invocations().unwrap();
        assert_eq!(invocations.len(), 3);
        for (index, invocation) in invocations.iter().enumerate() {
            assert_eq!(invocation.index, index);
            assert_eq!(
                invocation.command,
                format!("measure --param_0 {}", sweep.plan().column(0)[index])
            );
        }
    }

    #[test]
    fn mismatched_dispatch_is_rejected_before_running() {
        let sweep = sweep(ExecutionBackend::BatchQueue(PbsHost::with_env("env.sh")), 2);
        let program = FnProgram::new(|_: &[f64]| Ok(RawOutput::new()));
        let err = sweep
            .run(Dispatch::Local(&program), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.info().code, "sweep.dispatch_mismatch");
    }

    #[test]
    fn cancelled_before_start_skips_every_run() {
        let sweep = sweep(ExecutionBackend::Interactive(InteractiveHost::default()), 4);
        let program = FnProgram::new(|values: &[f64]| {
            Ok(RawOutput::from([("value".to_string(), values.to_vec())]))
        });
        let cancel = CancelToken::new();
        cancel.cancel();
        let dataset = sweep.run(Dispatch::Local(&program), &cancel).unwrap();
        assert!(dataset.cancelled);
        assert_eq!(dataset.skipped, 4);
        assert_eq!(dataset.succeeded, 0);
    }
}
