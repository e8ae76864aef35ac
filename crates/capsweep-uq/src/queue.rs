//! Batch-queue capability and its PBS implementation.
//!
//! The orchestrator packs invocations into [`BatchJob`]s, hands them to a
//! [`JobQueue`] and polls until each job reports per-invocation outcomes.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::{Mutex, PoisonError};

use capsweep_core::{parse_result_lines, CapError, ErrorInfo};

use crate::hosts::PbsHost;
use crate::program::Invocation;
use crate::runner::RawOutput;

/// Unit of work submitted to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchJob {
    /// Scheduler-visible job name, unique within a sweep.
    pub name: String,
    pub invocations: Vec<Invocation>,
}

/// Scheduler-assigned identifier of a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub id: String,
}

/// State of a submitted job.
#[derive(Debug)]
pub enum JobPoll {
    /// Still queued or running.
    Pending,
    /// Finished; one outcome per invocation, in job order.
    Finished(Vec<Result<RawOutput, CapError>>),
}

/// Scheduler capability used by the batch dispatcher.
pub trait JobQueue: Send + Sync {
    /// Enqueues a job. An error here means the backend is unusable.
    fn submit(&self, job: &BatchJob) -> Result<JobHandle, CapError>;

    /// Reports whether `job` has finished and, if so, its outcomes.
    fn poll(&self, handle: &JobHandle, job: &BatchJob) -> Result<JobPoll, CapError>;
}

/// Consecutive unusable `qstat` replies tolerated per job before its runs
/// are failed.
pub const DEFAULT_QSTAT_RETRIES: u32 = 12;

/// PBS/Torque queue driven through `qsub` and `qstat`.
#[derive(Debug)]
pub struct PbsQueue {
    host: PbsHost,
    work_dir: PathBuf,
    run_dir: Option<PathBuf>,
    qsub: String,
    qstat: String,
    qstat_retries: u32,
    qstat_misses: Mutex<HashMap<String, u32>>,
}

/// What one `qstat` call says about a job.
#[derive(Debug, PartialEq, Eq)]
enum QstatReply {
    Queued,
    Done,
    /// No usable answer; the job may still be queued.
    Unavailable(String),
}

/// Classifies a `qstat <id>` result. Only a completed state or an explicit
/// unknown-job reply counts as finished.
fn classify_qstat(output: &Output, id: &str) -> QstatReply {
    if output.status.success() {
        return match parse_qstat_state(&String::from_utf8_lossy(&output.stdout), id).as_deref() {
            Some("C") | Some("F") => QstatReply::Done,
            Some(_) => QstatReply::Queued,
            None => QstatReply::Unavailable("job missing from qstat output".to_string()),
        };
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("unknown job id") || lowered.contains("job has finished") {
        return QstatReply::Done;
    }
    let status = output
        .status
        .code()
        .map_or_else(|| "signal".to_string(), |code| code.to_string());
    QstatReply::Unavailable(format!("qstat exited with {status}: {}", stderr.trim()))
}

fn submission_error(code: &str, message: impl Into<String>, job: &BatchJob) -> CapError {
    CapError::Submission(ErrorInfo::new(code, message).with_context("job", job.name.clone()))
}

impl PbsQueue {
    /// Queue writing job scripts and run outputs below `work_dir`.
    pub fn new(host: PbsHost, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            host,
            work_dir: work_dir.into(),
            run_dir: None,
            qsub: "qsub".to_string(),
            qstat: "qstat".to_string(),
            qstat_retries: DEFAULT_QSTAT_RETRIES,
            qstat_misses: Mutex::new(HashMap::new()),
        }
    }

    /// Runs every packed command from `dir` instead of `$PBS_O_WORKDIR`.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(dir.into());
        self
    }

    /// Number of consecutive unusable `qstat` replies tolerated per job.
    pub fn with_qstat_retries(mut self, retries: u32) -> Self {
        self.qstat_retries = retries;
        self
    }

    /// Overrides the scheduler commands (site wrappers, tests).
    pub fn with_commands(mut self, qsub: impl Into<String>, qstat: impl Into<String>) -> Self {
        self.qsub = qsub.into();
        self.qstat = qstat.into();
        self
    }

    fn job_dir(&self, job: &BatchJob) -> PathBuf {
        self.work_dir.join(&job.name)
    }

    /// Renders the job script for `job`.
    pub fn render_script(&self, job: &BatchJob) -> String {
        self.script_in(job, &self.job_dir(job))
    }

    fn script_in(&self, job: &BatchJob, dir: &Path) -> String {
        let host = &self.host;
        let mut script = String::from("#!/bin/bash\n");
        let _ = writeln!(script, "#PBS -N {}", job.name);
        let _ = writeln!(script, "#PBS -q {}", host.qname);
        let _ = writeln!(script, "#PBS -l walltime={}", host.walltime);
        if host.cpus > 0 {
            let per_node = if host.cpus_per_node > 0 {
                host.cpus_per_node
            } else {
                host.cpus
            };
            let nodes = host.cpus.div_ceil(per_node);
            let _ = writeln!(script, "#PBS -l nodes={nodes}:ppn={per_node}");
        }
        let _ = writeln!(script, "#PBS -o {}", dir.join("pbs.out").display());
        let _ = writeln!(script, "#PBS -e {}", dir.join("pbs.err").display());
        if !host.env.trim().is_empty() {
            let _ = writeln!(script, "source {}", host.env);
        }
        for module in &host.modules {
            let _ = writeln!(script, "module load {module}");
        }
        match &self.run_dir {
            Some(run_dir) => {
                let _ = writeln!(script, "cd \"{}\"", run_dir.display());
            }
            None => {
                let _ = writeln!(script, "cd \"$PBS_O_WORKDIR\"");
            }
        }
        for invocation in &job.invocations {
            let stem = dir.join(format!("run_{:06}", invocation.index));
            let _ = writeln!(
                script,
                "( {} ) > {out} 2> {err}\necho $? > {status}",
                invocation.command,
                out = stem.with_extension("out").display(),
                err = stem.with_extension("err").display(),
                status = stem.with_extension("status").display(),
            );
        }
        script
    }

    fn read_outcome(&self, dir: &Path, invocation: &Invocation) -> Result<RawOutput, CapError> {
        let stem = dir.join(format!("run_{:06}", invocation.index));
        let failure = |code: &str, message: String| {
            CapError::Invocation(
                ErrorInfo::new(code, message).with_context("run", invocation.index.to_string()),
            )
        };
        let status = fs::read_to_string(stem.with_extension("status"))
            .map_err(|err| failure("run.no_status", err.to_string()))?;
        let status = status.trim();
        if status != "0" {
            let stderr = fs::read_to_string(stem.with_extension("err")).unwrap_or_default();
            return Err(CapError::Invocation(
                ErrorInfo::new("run.exit_status", format!("test program exited with {status}"))
                    .with_context("run", invocation.index.to_string())
                    .with_context("stderr", stderr.trim_end().to_string()),
            ));
        }
        let stdout = fs::read_to_string(stem.with_extension("out"))
            .map_err(|err| failure("run.no_output", err.to_string()))?;
        parse_result_lines(&stdout).map_err(|err| match err {
            CapError::Invocation(info) => {
                CapError::Invocation(info.with_context("run", invocation.index.to_string()))
            }
            other => other,
        })
    }

    /// Counts an unusable reply; returns the consecutive count for `id`.
    fn record_miss(&self, id: &str) -> u32 {
        let mut misses = self.qstat_misses.lock().unwrap_or_else(PoisonError::into_inner);
        let count = misses.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    fn clear_misses(&self, id: &str) {
        self.qstat_misses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

/// Extracts the state column of the `qstat` row describing `id`.
pub fn parse_qstat_state(stdout: &str, id: &str) -> Option<String> {
    let short = id.split('.').next().unwrap_or(id);
    stdout
        .lines()
        .map(str::split_whitespace)
        .map(Iterator::collect::<Vec<_>>)
        .find(|columns| {
            columns
                .first()
                .is_some_and(|first| first.split('.').next() == Some(short))
        })
        .and_then(|columns| columns.get(4).map(|state| state.to_string()))
}

fn run_command(program: &str, args: &[&str]) -> std::io::Result<Output> {
    Command::new(program).args(args).output()
}

impl JobQueue for PbsQueue {
    fn submit(&self, job: &BatchJob) -> Result<JobHandle, CapError> {
        let dir = self.job_dir(job);
        let write_error = |code: &str, path: &Path, err: std::io::Error| {
            CapError::Submission(
                ErrorInfo::new(code, err.to_string())
                    .with_context("job", job.name.clone())
                    .with_context("path", path.display().to_string()),
            )
        };
        fs::create_dir_all(&dir).map_err(|err| write_error("pbs.job_dir", &dir, err))?;
        // The script runs from the scheduler's cwd, so its paths must be absolute.
        let dir = fs::canonicalize(&dir).map_err(|err| write_error("pbs.job_dir", &dir, err))?;
        let script_path = dir.join("job.pbs");
        fs::write(&script_path, self.script_in(job, &dir))
            .map_err(|err| write_error("pbs.script_write", &script_path, err))?;
        let script_arg = script_path.to_string_lossy();
        let output = run_command(&self.qsub, &[script_arg.as_ref()])
            .map_err(|err| submission_error("pbs.qsub_spawn", err.to_string(), job))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(submission_error(
                "pbs.qsub_rejected",
                format!("qsub refused job: {}", stderr.trim()),
                job,
            ));
        }
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(submission_error("pbs.qsub_no_id", "qsub printed no job id", job));
        }
        tracing::debug!(job = %job.name, id = %id, runs = job.invocations.len(), "submitted batch job");
        Ok(JobHandle { id })
    }

    fn poll(&self, handle: &JobHandle, job: &BatchJob) -> Result<JobPoll, CapError> {
        let reply = match run_command(&self.qstat, &[handle.id.as_str()]) {
            Ok(output) => classify_qstat(&output, &handle.id),
            Err(err) => QstatReply::Unavailable(format!("qstat could not be spawned: {err}")),
        };
        match reply {
            QstatReply::Queued => {
                self.clear_misses(&handle.id);
                Ok(JobPoll::Pending)
            }
            QstatReply::Unavailable(detail) => {
                let misses = self.record_miss(&handle.id);
                if misses <= self.qstat_retries {
                    tracing::warn!(job = %job.name, id = %handle.id, misses, detail = %detail, "qstat gave no usable answer");
                    return Ok(JobPoll::Pending);
                }
                self.clear_misses(&handle.id);
                Err(CapError::Submission(
                    ErrorInfo::new("pbs.qstat_failed", detail)
                        .with_context("job", handle.id.clone())
                        .with_context("attempts", misses.to_string()),
                ))
            }
            QstatReply::Done => {
                self.clear_misses(&handle.id);
                let dir = self.job_dir(job);
                let outcomes = job
                    .invocations
                    .iter()
                    .map(|invocation| self.read_outcome(&dir, invocation))
                    .collect();
                Ok(JobPoll::Finished(outcomes))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> BatchJob {
        BatchJob {
            name: "capsweep_0002".to_string(),
            invocations: vec![
                Invocation {
                    index: 4,
                    assignment: vec![1.0],
                    command: "measure --param_0 1".to_string(),
                },
                Invocation {
                    index: 5,
                    assignment: vec![2.0],
                    command: "measure --param_0 2".to_string(),
                },
            ],
        }
    }

    #[test]
    fn script_carries_scheduler_directives() {
        let mut host = PbsHost::with_env("/opt/capsweep/env.sh");
        host.cpus = 16;
        host.cpus_per_node = 8;
        host.modules = vec!["python".into(), "hdf5".into()];
        let queue = PbsQueue::new(host, "/scratch/sweep");
        let script = queue.render_script(&job());

        assert!(script.contains("#PBS -q standby\n"));
        assert!(script.contains("#PBS -l walltime=1:00:00\n"));
        assert!(script.contains("#PBS -l nodes=2:ppn=8\n"));
        assert!(script.contains("source /opt/capsweep/env.sh\n"));
        assert!(script.contains("module load python\nmodule load hdf5\n"));
        assert!(script.contains("( measure --param_0 1 ) > /scratch/sweep/capsweep_0002/run_000004.out"));
        assert!(script.contains("( measure --param_0 2 )"));
    }

    #[test]
    fn script_runs_from_the_configured_directory() {
        let queue = PbsQueue::new(PbsHost::with_env(""), "/scratch/sweep").in_dir("/data/configs");
        let script = queue.render_script(&job());
        assert!(script.contains("cd \"/data/configs\"\n"));
        assert!(!script.contains("PBS_O_WORKDIR"));

        let default = PbsQueue::new(PbsHost::with_env(""), "/scratch/sweep").render_script(&job());
        assert!(default.contains("cd \"$PBS_O_WORKDIR\"\n"));
    }

    #[test]
    fn qstat_state_column_is_found() {
        let stdout = "Job id            Name             User              Time Use S Queue\n\
                      ----------------  ---------------- ----------------  -------- - -----\n\
                      1234.pbs-server   capsweep_0002    alice             00:00:01 R standby\n";
        assert_eq!(parse_qstat_state(stdout, "1234.pbs-server").as_deref(), Some("R"));
        assert_eq!(parse_qstat_state(stdout, "99.pbs-server"), None);
    }

    #[cfg(unix)]
    fn reply(code: i32, stdout: &str, stderr: &str) -> Output {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    #[cfg(unix)]
    #[test]
    fn only_completed_or_unknown_jobs_count_as_done() {
        let row = |state: &str| format!("7.server  capsweep_0000  alice  00:00:01 {state} standby\n");
        assert_eq!(classify_qstat(&reply(0, &row("C"), ""), "7.server"), QstatReply::Done);
        assert_eq!(classify_qstat(&reply(0, &row("F"), ""), "7.server"), QstatReply::Done);
        assert_eq!(classify_qstat(&reply(0, &row("R"), ""), "7.server"), QstatReply::Queued);
        assert_eq!(classify_qstat(&reply(0, &row("E"), ""), "7.server"), QstatReply::Queued);
        assert_eq!(
            classify_qstat(&reply(153, "", "qstat: Unknown Job Id Error 7.server\n"), "7.server"),
            QstatReply::Done
        );
        assert!(matches!(
            classify_qstat(&reply(0, "", ""), "7.server"),
            QstatReply::Unavailable(_)
        ));
        assert!(matches!(
            classify_qstat(&reply(1, "", "cannot connect to server\n"), "7.server"),
            QstatReply::Unavailable(_)
        ));
    }

    /// Writes an executable shell script and returns its path.
    #[cfg(unix)]
    fn stub_command(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn failing_qstat_keeps_the_job_pending_until_retries_run_out() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let qsub = stub_command(dir.path(), "qsub", "echo 4242.stub-server");
        let queue = PbsQueue::new(PbsHost::with_env(""), dir.path().join("jobs"))
            .with_commands(qsub, "false")
            .with_qstat_retries(2);
        let job = job();

        let handle = queue.submit(&job).unwrap();
        assert_eq!(handle.id, "4242.stub-server");
        assert!(matches!(queue.poll(&handle, &job).unwrap(), JobPoll::Pending));
        assert!(matches!(queue.poll(&handle, &job).unwrap(), JobPoll::Pending));
        let err = queue.poll(&handle, &job).unwrap_err();
        assert_eq!(err.info().code, "pbs.qstat_failed");
        assert_eq!(err.info().context["attempts"], "3");
    }

    #[cfg(unix)]
    #[test]
    fn purged_job_outcomes_are_collected_from_its_directory() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let qsub = stub_command(dir.path(), "qsub", "sh \"$1\" >/dev/null 2>&1\necho 4243.stub-server");
        let qstat = stub_command(dir.path(), "qstat", "echo \"qstat: Unknown Job Id Error $1\" >&2\nexit 153");
        let queue = PbsQueue::new(PbsHost::with_env(""), dir.path().join("jobs"))
            .with_commands(qsub, qstat)
            .in_dir(dir.path());
        fs::write(dir.path().join("reading.txt"), "2.5").unwrap();
        let job = BatchJob {
            name: "capsweep_0000".to_string(),
            invocations: vec![
                Invocation {
                    index: 0,
                    assignment: vec![2.5],
                    command: r#"echo "@@capsweep-result {\"name\":\"modulus\",\"values\":[$(cat reading.txt)]}""#
                        .to_string(),
                },
                Invocation {
                    index: 1,
                    assignment: vec![3.0],
                    command: "echo broken device >&2; exit 3".to_string(),
                },
            ],
        };

        let handle = queue.submit(&job).unwrap();
        let JobPoll::Finished(outcomes) = queue.poll(&handle, &job).unwrap() else {
            panic!("job should be finished");
        };
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].as_ref().unwrap()["modulus"], vec![2.5]);
        let err = outcomes[1].as_ref().unwrap_err();
        assert_eq!(err.info().code, "run.exit_status");
        assert_eq!(err.info().context["stderr"], "broken device");
    }

    #[test]
    fn outcomes_are_read_from_run_files() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let queue = PbsQueue::new(PbsHost::with_env(""), dir.path());
        let job = job();
        let job_dir = dir.path().join(&job.name);
        fs::create_dir_all(&job_dir).unwrap();
        fs::write(job_dir.join("run_000004.status"), "0\n").unwrap();
        fs::write(
            job_dir.join("run_000004.out"),
            "@@capsweep-result {\"name\":\"modulus\",\"values\":[1.0,2.0]}\n",
        )
        .unwrap();
        fs::write(job_dir.join("run_000005.status"), "1\n").unwrap();
        fs::write(job_dir.join("run_000005.err"), "bad device\n").unwrap();

        let first = queue.read_outcome(&job_dir, &job.invocations[0]).unwrap();
        assert_eq!(first["modulus"], vec![1.0, 2.0]);
        let second = queue.read_outcome(&job_dir, &job.invocations[1]).unwrap_err();
        assert_eq!(second.info().code, "run.exit_status");
        assert_eq!(second.info().context["stderr"], "bad device");
    }
}
