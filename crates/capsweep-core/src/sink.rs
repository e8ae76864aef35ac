//! Named-array result sinks and the stdout line protocol between test
//! programs and the sweep orchestrator.
//!
//! A test program stores each derived quantity with [`ResultSink::store`].
//! [`StdoutSink`] writes one line per call:
//!
//! ```text
//! @@capsweep-result {"name":"modulus","values":[5.0,"inf"]}
//! ```
//!
//! Any other stdout line is ignored by [`parse_result_lines`], so test
//! programs may print free-form diagnostics alongside their results.

use std::collections::BTreeMap;
use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::errors::{CapError, ErrorInfo};
use crate::serde::finite_lossless;

/// Prefix identifying a result line on a test program's stdout.
pub const RESULT_MARKER: &str = "@@capsweep-result ";

/// One persisted named array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Quantity name (`frequency`, `resistance`, ...).
    pub name: String,
    /// Values, non-finite entries included.
    #[serde(with = "finite_lossless")]
    pub values: Vec<f64>,
}

/// Destination for named arrays.
pub trait ResultSink {
    /// Persists `values` under `name`.
    fn store(&mut self, name: &str, values: &[f64]) -> Result<(), CapError>;
}

/// Writes result lines to any `Write` implementation (stdout by default).
#[derive(Debug)]
pub struct StdoutSink<W: Write = std::io::Stdout> {
    writer: W,
}

impl StdoutSink {
    /// Sink bound to the process stdout.
    pub fn stdout() -> Self {
        Self {
            writer: std::io::stdout(),
        }
    }
}

impl<W: Write> StdoutSink<W> {
    /// Sink bound to an arbitrary writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for StdoutSink<W> {
    fn store(&mut self, name: &str, values: &[f64]) -> Result<(), CapError> {
        let line = format_result_line(name, values)?;
        writeln!(self.writer, "{line}")
            .and_then(|_| self.writer.flush())
            .map_err(|err| CapError::io("sink.write", "stdout", err))
    }
}

/// Collects stored arrays in memory, keyed by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemorySink {
    /// Arrays stored so far.
    pub arrays: BTreeMap<String, Vec<f64>>,
}

impl ResultSink for MemorySink {
    fn store(&mut self, name: &str, values: &[f64]) -> Result<(), CapError> {
        self.arrays.insert(name.to_string(), values.to_vec());
        Ok(())
    }
}

/// Result names double as output file stems: one or more of
/// `[A-Za-z0-9_.-]`, not made of dots alone.
pub fn is_valid_result_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().all(|c| c == '.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Renders one result line, marker included.
pub fn format_result_line(name: &str, values: &[f64]) -> Result<String, CapError> {
    if !is_valid_result_name(name) {
        return Err(CapError::Serde(
            ErrorInfo::new("sink.invalid_name", format!("result name {name:?} is not a plain file stem"))
                .with_context("name", name),
        ));
    }
    let record = ResultRecord {
        name: name.to_string(),
        values: values.to_vec(),
    };
    let json = serde_json::to_string(&record).map_err(|err| {
        CapError::Serde(ErrorInfo::new("sink.encode", err.to_string()).with_context("name", name))
    })?;
    Ok(format!("{RESULT_MARKER}{json}"))
}

/// Extracts every result record from a test program's stdout.
///
/// A marker line whose payload does not parse, or whose name fails
/// [`is_valid_result_name`], is an error; a repeated name keeps the last
/// value, mirroring a key-value store overwrite.
pub fn parse_result_lines(stdout: &str) -> Result<BTreeMap<String, Vec<f64>>, CapError> {
    let mut arrays = BTreeMap::new();
    for (line_no, line) in stdout.lines().enumerate() {
        let Some(payload) = line.trim_end().strip_prefix(RESULT_MARKER) else {
            continue;
        };
        let record: ResultRecord = serde_json::from_str(payload).map_err(|err| {
            CapError::Invocation(
                ErrorInfo::new("run.malformed_output", err.to_string())
                    .with_context("line", (line_no + 1).to_string()),
            )
        })?;
        if !is_valid_result_name(&record.name) {
            return Err(CapError::Invocation(
                ErrorInfo::new("run.malformed_output", "result name is not a plain file stem")
                    .with_context("line", (line_no + 1).to_string())
                    .with_context("name", record.name),
            ));
        }
        arrays.insert(record.name, record.values);
    }
    Ok(arrays)
}
