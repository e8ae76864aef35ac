//! Aggregate dataset assembled from the runs of one sweep, and its on-disk form.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use capsweep_core::{
    is_valid_result_name, to_canonical_json_bytes, CapError, ErrorInfo, ResultRecord,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::parameters::Parameter;
use crate::program::Invocation;
use crate::runner::RawOutput;
use crate::sampling::SamplingSettings;

/// Raw output of one successful run, tied to its assignment vector.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub index: usize,
    pub assignment: Vec<f64>,
    pub output: RawOutput,
}

/// A run that exited abnormally or produced unusable output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub index: usize,
    pub assignment: Vec<f64>,
    pub error: CapError,
}

/// Provenance fields fixed before any run is dispatched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetHeader {
    pub plan_hash: String,
    pub backend: String,
    pub parameters: Vec<Parameter>,
    pub settings: SamplingSettings,
    pub planned: usize,
}

/// Every successful run's arrays, concatenated in plan order.
///
/// `run_lengths[k]` values of every array belong to run `run_indices[k]`, so
/// all arrays share the same total length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDataset {
    #[serde(flatten)]
    pub header: DatasetHeader,
    pub created_at: String,
    pub succeeded: usize,
    pub failed: usize,
    /// Planned runs never dispatched because the sweep was cancelled.
    pub skipped: usize,
    pub cancelled: bool,
    pub run_indices: Vec<usize>,
    pub assignments: Vec<Vec<f64>>,
    pub run_lengths: Vec<usize>,
    pub arrays: Vec<ResultRecord>,
    pub failures: Vec<RunFailure>,
}

fn output_failure(code: &str, message: impl Into<String>, index: usize) -> CapError {
    CapError::Invocation(ErrorInfo::new(code, message).with_context("run", index.to_string()))
}

/// Checks one run's output against the schema of the first accepted run and
/// returns the common length of its arrays.
fn validate_output(
    index: usize,
    output: &RawOutput,
    schema: Option<&[String]>,
) -> Result<usize, CapError> {
    let mut lengths = output.values().map(Vec::len);
    let Some(length) = lengths.next() else {
        return Err(output_failure("run.no_results", "run reported no arrays", index));
    };
    if let Some(name) = output.keys().find(|name| !is_valid_result_name(name)) {
        return Err(CapError::Invocation(
            ErrorInfo::new("run.malformed_output", "result name is not a plain file stem")
                .with_context("run", index.to_string())
                .with_context("name", name.clone()),
        ));
    }
    if lengths.any(|other| other != length) {
        let shape = output
            .iter()
            .map(|(name, values)| format!("{name}={}", values.len()))
            .collect::<Vec<_>>()
            .join(",");
        return Err(CapError::Invocation(
            ErrorInfo::new("run.ragged_output", "arrays of one run differ in length")
                .with_context("run", index.to_string())
                .with_context("lengths", shape),
        ));
    }
    if let Some(schema) = schema {
        if !output.keys().eq(schema.iter()) {
            return Err(CapError::Invocation(
                ErrorInfo::new("run.schema_mismatch", "run reported a different set of arrays")
                    .with_context("run", index.to_string())
                    .with_context("expected", schema.join(","))
                    .with_context("actual", output.keys().cloned().collect::<Vec<_>>().join(",")),
            ));
        }
    }
    Ok(length)
}

impl AggregateDataset {
    /// Assembles collected outcomes. Outcomes may arrive in any order; the
    /// dataset lists runs in plan order.
    pub fn assemble(
        header: DatasetHeader,
        mut outcomes: Vec<(Invocation, Result<RawOutput, CapError>)>,
        cancelled: bool,
    ) -> Self {
        outcomes.sort_by_key(|(invocation, _)| invocation.index);
        let skipped = header.planned.saturating_sub(outcomes.len());
        let mut schema: Option<Vec<String>> = None;
        let mut merged: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        let mut run_indices = Vec::new();
        let mut assignments = Vec::new();
        let mut run_lengths = Vec::new();
        let mut failures = Vec::new();

        for (invocation, outcome) in outcomes {
            let accepted = outcome.and_then(|output| {
                let length = validate_output(invocation.index, &output, schema.as_deref())?;
                Ok((output, length))
            });
            match accepted {
                Ok((output, length)) => {
                    let run = RunResult {
                        index: invocation.index,
                        assignment: invocation.assignment,
                        output,
                    };
                    if schema.is_none() {
                        schema = Some(run.output.keys().cloned().collect());
                    }
                    for (name, values) in run.output {
                        merged.entry(name).or_default().extend(values);
                    }
                    run_indices.push(run.index);
                    assignments.push(run.assignment);
                    run_lengths.push(length);
                }
                Err(error) => failures.push(RunFailure {
                    index: invocation.index,
                    assignment: invocation.assignment,
                    error,
                }),
            }
        }

        Self {
            header,
            created_at: Utc::now().to_rfc3339(),
            succeeded: run_indices.len(),
            failed: failures.len(),
            skipped,
            cancelled,
            run_indices,
            assignments,
            run_lengths,
            arrays: merged
                .into_iter()
                .map(|(name, values)| ResultRecord { name, values })
                .collect(),
            failures,
        }
    }

    /// Concatenated values of the named array.
    pub fn array(&self, name: &str) -> Option<&[f64]> {
        self.arrays
            .iter()
            .find(|record| record.name == name)
            .map(|record| record.values.as_slice())
    }

    /// Writes `dataset.json`, `failures.json` and one `<name>.csv` per array.
    pub fn write_dataset(&self, dir: &Path) -> Result<(), CapError> {
        fs::create_dir_all(dir).map_err(|err| CapError::io("dataset.out_dir", dir.display(), err))?;
        let dataset_path = dir.join("dataset.json");
        fs::write(&dataset_path, to_canonical_json_bytes(self)?)
            .map_err(|err| CapError::io("dataset.write", dataset_path.display(), err))?;
        let failures_path = dir.join("failures.json");
        fs::write(&failures_path, to_canonical_json_bytes(&self.failures)?)
            .map_err(|err| CapError::io("dataset.write", failures_path.display(), err))?;
        for record in &self.arrays {
            self.write_csv(&dir.join(format!("{}.csv", record.name)), record)?;
        }
        Ok(())
    }

    /// One row per successful run: `run`, its parameter values, then its slice
    /// of the array as `value_0..`.
    fn write_csv(&self, path: &Path, record: &ResultRecord) -> Result<(), CapError> {
        let csv_error = |err: csv::Error| {
            CapError::Serde(
                ErrorInfo::new("dataset.csv", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        };
        let width = self.run_lengths.iter().copied().max().unwrap_or(0);
        let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
        let header = std::iter::once("run".to_string())
            .chain(self.header.parameters.iter().map(|param| param.id.clone()))
            .chain((0..width).map(|k| format!("value_{k}")));
        writer.write_record(header).map_err(csv_error)?;

        let mut offset = 0;
        for ((index, assignment), length) in self
            .run_indices
            .iter()
            .zip(&self.assignments)
            .zip(&self.run_lengths)
        {
            let values = &record.values[offset..offset + length];
            offset += length;
            let row = std::iter::once(index.to_string())
                .chain(assignment.iter().map(f64::to_string))
                .chain(values.iter().map(f64::to_string))
                .chain(std::iter::repeat(String::new()).take(width - length));
            writer.write_record(row).map_err(csv_error)?;
        }
        writer
            .flush()
            .map_err(|err| CapError::io("dataset.csv", path.display(), err))
    }
}
