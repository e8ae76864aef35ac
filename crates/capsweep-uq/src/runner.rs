//! Capability running a single invocation of the test program.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Output};

use capsweep_core::{parse_result_lines, CapError, ErrorInfo};

use crate::program::Invocation;

/// Named arrays reported by one run.
pub type RawOutput = BTreeMap<String, Vec<f64>>;

/// Runs one resolved invocation and returns its raw output.
pub trait TestProgram: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<RawOutput, CapError>;
}

const SHELL: &str = "sh";

/// Runs the command line through `sh -c` and parses its stdout.
#[derive(Debug, Clone, Default)]
pub struct ProcessProgram {
    working_dir: Option<PathBuf>,
}

impl ProcessProgram {
    /// Runs every invocation from `dir` instead of the current directory.
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

/// Converts a finished process into its parsed results or an invocation failure.
pub fn collect_output(invocation: &Invocation, output: &Output) -> Result<RawOutput, CapError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: String = stderr
            .lines()
            .rev()
            .take(5)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n");
        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        return Err(CapError::Invocation(
            ErrorInfo::new("run.exit_status", format!("test program exited with {code}"))
                .with_context("run", invocation.index.to_string())
                .with_context("stderr", tail),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_result_lines(&stdout).map_err(|err| match err {
        CapError::Invocation(info) => {
            CapError::Invocation(info.with_context("run", invocation.index.to_string()))
        }
        other => other,
    })
}

impl TestProgram for ProcessProgram {
    fn run(&self, invocation: &Invocation) -> Result<RawOutput, CapError> {
        let mut command = Command::new(SHELL);
        command.arg("-c").arg(&invocation.command);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|err| {
            CapError::Invocation(
                ErrorInfo::new("run.spawn", err.to_string())
                    .with_context("run", invocation.index.to_string())
                    .with_context("shell", SHELL),
            )
        })?;
        collect_output(invocation, &output)
    }
}

/// In-process test program backed by a closure over the assignment vector.
pub struct FnProgram<F> {
    func: F,
}

impl<F> FnProgram<F>
where
    F: Fn(&[f64]) -> Result<RawOutput, CapError> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> TestProgram for FnProgram<F>
where
    F: Fn(&[f64]) -> Result<RawOutput, CapError> + Send + Sync,
{
    fn run(&self, invocation: &Invocation) -> Result<RawOutput, CapError> {
        (self.func)(&invocation.assignment)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn invocation(command: &str) -> Invocation {
        Invocation {
            index: 4,
            assignment: vec![1.0],
            command: command.to_string(),
        }
    }

    #[test]
    fn process_results_are_parsed_from_stdout() {
        let program = ProcessProgram::default();
        let output = program
            .run(&invocation(
                "echo noise; echo '@@capsweep-result {\"name\":\"modulus\",\"values\":[5.0]}'",
            ))
            .unwrap();
        assert_eq!(output["modulus"], vec![5.0]);
    }

    #[test]
    fn nonzero_exit_is_an_invocation_failure() {
        let program = ProcessProgram::default();
        let err = program
            .run(&invocation("echo boom >&2; exit 3"))
            .unwrap_err();
        assert!(matches!(err, CapError::Invocation(_)));
        assert_eq!(err.info().context["run"], "4");
        assert_eq!(err.info().context["stderr"], "boom");
    }
}
