//! Uncertain input parameters and the builder turning declarative
//! descriptors into them.

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use serde::{Deserialize, Serialize};

/// Probability distribution of one parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Distribution {
    /// Uniform on `[min, max]`.
    Uniform { min: f64, max: f64 },
    /// Gaussian with the given mean and standard deviation.
    Normal { mean: f64, dev: f64 },
}

/// One swept parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Substitution token, `param_<index>`.
    pub id: String,
    /// Display name; the test programs use it as the config path to override.
    pub name: String,
    pub distribution: Distribution,
}

impl Parameter {
    /// Identifier synthesised for the parameter at `index`.
    pub fn id_for(index: usize) -> String {
        format!("param_{index}")
    }
}

/// Point at fraction `frac` of `[min, max]`, clamped so rounding never leaves
/// the range. Reversed ranges are accepted.
pub(crate) fn uniform_point(min: f64, max: f64, frac: f64) -> f64 {
    (min + frac * (max - min)).max(min.min(max)).min(min.max(max))
}

/// Declarative description of one parameter as found in `uq.param_<i>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    pub distribution_type: String,
    pub name: String,
    #[serde(default)]
    pub range: Option<Vec<f64>>,
    #[serde(default)]
    pub mean: Option<f64>,
    #[serde(default)]
    pub standard_deviation: Option<f64>,
}

fn unsupported_distribution(index: usize, token: &str) -> CapError {
    CapError::Unsupported(
        ErrorInfo::new(
            "uq.unsupported_distribution",
            format!("invalid distribution type {token} for {}", Parameter::id_for(index)),
        )
        .with_context("param", Parameter::id_for(index))
        .with_context("distribution_type", token)
        .with_hint("expected uniform or normal"),
    )
}

fn missing_field(index: usize, field: &str) -> CapError {
    CapError::Config(
        ErrorInfo::new("uq.missing_parameter_field", format!("missing {field}"))
            .with_context("param", Parameter::id_for(index))
            .with_context("field", field),
    )
}

impl ParameterDescriptor {
    /// Reads the descriptor stored under `param_<index>` of the `uq` subtree.
    ///
    /// Only the fields relevant to the declared distribution are read, so a
    /// normal parameter does not need a `range` and vice versa.
    pub fn from_tree(uq: &PropertyTree, index: usize) -> Result<Self, CapError> {
        let node = uq.get_child(&Parameter::id_for(index))?;
        let distribution_type = node.get_string("distribution_type")?;
        let name = node.get_string("name")?;
        let mut descriptor = Self {
            distribution_type,
            name,
            range: None,
            mean: None,
            standard_deviation: None,
        };
        match descriptor.distribution_type.as_str() {
            "uniform" => descriptor.range = Some(node.get_array_double("range")?),
            "normal" => {
                descriptor.mean = Some(node.get_double("mean")?);
                descriptor.standard_deviation = Some(node.get_double("standard_deviation")?);
            }
            other => return Err(unsupported_distribution(index, other)),
        }
        Ok(descriptor)
    }

    /// Validates the descriptor and produces the parameter at `index`.
    pub fn build(&self, index: usize) -> Result<Parameter, CapError> {
        let distribution = match self.distribution_type.as_str() {
            "uniform" => {
                let range = self.range.as_ref().ok_or_else(|| missing_field(index, "range"))?;
                let [min, max] = range.as_slice() else {
                    return Err(CapError::Config(
                        ErrorInfo::new("uq.invalid_range", "range needs exactly two values")
                            .with_context("param", Parameter::id_for(index))
                            .with_context("len", range.len().to_string()),
                    ));
                };
                Distribution::Uniform {
                    min: *min,
                    max: *max,
                }
            }
            "normal" => Distribution::Normal {
                mean: self.mean.ok_or_else(|| missing_field(index, "mean"))?,
                dev: self
                    .standard_deviation
                    .ok_or_else(|| missing_field(index, "standard_deviation"))?,
            },
            other => return Err(unsupported_distribution(index, other)),
        };
        Ok(Parameter {
            id: Parameter::id_for(index),
            name: self.name.clone(),
            distribution,
        })
    }
}

/// Builds the index-aligned parameter list, stopping at the first invalid entry.
pub fn build_parameters(descriptors: &[ParameterDescriptor]) -> Result<Vec<Parameter>, CapError> {
    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| descriptor.build(index))
        .collect()
}

/// Reads `uq.params` descriptors from the `uq` subtree and builds them.
pub fn parameters_from_tree(uq: &PropertyTree) -> Result<Vec<Parameter>, CapError> {
    let count = uq.get_int("params")?;
    if count < 0 {
        return Err(CapError::Config(
            ErrorInfo::new("uq.invalid_params", "parameter count must be non-negative")
                .with_context("params", count.to_string()),
        ));
    }
    let descriptors = (0..count as usize)
        .map(|index| ParameterDescriptor::from_tree(uq, index))
        .collect::<Result<Vec<_>, _>>()?;
    build_parameters(&descriptors)
}
