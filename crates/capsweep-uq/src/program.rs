//! Invocation template of the externally run test program.

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use serde::{Deserialize, Serialize};

use crate::parameters::Parameter;

/// Marker preceding a parameter identifier inside the template.
pub const PLACEHOLDER_SIGIL: char = '$';

/// Command line template with one `--param_<i> $param_<i>` pair per parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramDescriptor {
    pub template: String,
    pub description: String,
    /// Identifiers in substitution order.
    pub parameter_ids: Vec<String>,
}

/// One fully resolved run of the test program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    /// Position of the assignment vector in the sampling plan.
    pub index: usize,
    pub assignment: Vec<f64>,
    pub command: String,
}

impl ProgramDescriptor {
    /// Appends the placeholder pair of every parameter to `executable`.
    pub fn new(
        executable: &str,
        description: impl Into<String>,
        parameters: &[Parameter],
    ) -> Self {
        let mut template = executable.trim_end().to_string();
        for param in parameters {
            template.push_str(&format!(" --{id} {PLACEHOLDER_SIGIL}{id}", id = param.id));
        }
        Self {
            template,
            description: description.into(),
            parameter_ids: parameters.iter().map(|param| param.id.clone()).collect(),
        }
    }

    /// Reads `executable` and `description` from the `test_program` subtree.
    pub fn from_tree(test_program: &PropertyTree, parameters: &[Parameter]) -> Result<Self, CapError> {
        let executable = test_program.get_string("executable")?;
        if executable.trim().is_empty() {
            return Err(CapError::Config(
                ErrorInfo::new("uq.empty_executable", "test program executable is empty")
                    .with_context("path", "test_program.executable"),
            ));
        }
        let description = test_program.get_string("description")?;
        Ok(Self::new(&executable, description, parameters))
    }

    /// Identifiers of every placeholder present in the template, in order of appearance.
    pub fn placeholders(&self) -> Vec<String> {
        scan_placeholders(&self.template)
            .into_iter()
            .map(|(_, _, name)| name.to_string())
            .filter(|name| self.parameter_ids.iter().any(|id| id == name))
            .collect()
    }

    /// Substitutes `values`, positionally aligned with `parameter_ids`.
    pub fn resolve(&self, values: &[f64]) -> Result<String, CapError> {
        if values.len() != self.parameter_ids.len() {
            return Err(CapError::Config(
                ErrorInfo::new(
                    "uq.assignment_arity",
                    "assignment vector size differs from parameter count",
                )
                .with_context("expected", self.parameter_ids.len().to_string())
                .with_context("actual", values.len().to_string()),
            ));
        }
        let mut resolved = String::with_capacity(self.template.len() + 16 * values.len());
        let mut cursor = 0;
        for (start, end, name) in scan_placeholders(&self.template) {
            let Some(position) = self.parameter_ids.iter().position(|id| id == name) else {
                continue;
            };
            resolved.push_str(&self.template[cursor..start]);
            resolved.push_str(&values[position].to_string());
            cursor = end;
        }
        resolved.push_str(&self.template[cursor..]);
        Ok(resolved)
    }

    /// Resolves the assignment at plan position `index`.
    pub fn invocation(&self, index: usize, assignment: &[f64]) -> Result<Invocation, CapError> {
        Ok(Invocation {
            index,
            assignment: assignment.to_vec(),
            command: self.resolve(assignment)?,
        })
    }
}

/// Finds `$identifier` spans, returning `(start, end, identifier)` byte ranges.
fn scan_placeholders(template: &str) -> Vec<(usize, usize, &str)> {
    let bytes = template.as_bytes();
    let mut found = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == PLACEHOLDER_SIGIL as u8 {
            let start = i;
            let mut end = i + 1;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            if end > start + 1 {
                found.push((start, end, &template[start + 1..end]));
            }
            i = end;
        } else {
            i += 1;
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::Distribution;

    fn params(count: usize) -> Vec<Parameter> {
        (0..count)
            .map(|index| Parameter {
                id: Parameter::id_for(index),
                name: format!("device.p{index}"),
                distribution: Distribution::Uniform { min: 0.0, max: 1.0 },
            })
            .collect()
    }

    #[test]
    fn template_appends_one_pair_per_parameter() {
        let program = ProgramDescriptor::new("./measure.py", "eis", &params(2));
        assert_eq!(
            program.template,
            "./measure.py --param_0 $param_0 --param_1 $param_1"
        );
    }

    #[test]
    fn double_digit_identifiers_do_not_collide() {
        let program = ProgramDescriptor::new("run", "", &params(11));
        let values: Vec<f64> = (0..11).map(|v| v as f64 + 0.5).collect();
        let resolved = program.resolve(&values).unwrap();
        assert!(resolved.ends_with("--param_1 1.5 --param_2 2.5 --param_3 3.5 --param_4 4.5 --param_5 5.5 --param_6 6.5 --param_7 7.5 --param_8 8.5 --param_9 9.5 --param_10 10.5"));
    }

    #[test]
    fn foreign_shell_variables_are_left_alone() {
        let program = ProgramDescriptor::new("cd $HOME && run", "", &params(1));
        assert_eq!(program.resolve(&[2.0]).unwrap(), "cd $HOME && run --param_0 2");
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let program = ProgramDescriptor::new("run", "", &params(2));
        let err = program.resolve(&[1.0]).unwrap_err();
        assert_eq!(err.info().code, "uq.assignment_arity");
    }
}
