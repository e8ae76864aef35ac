//! Sampling strategies turning a parameter set into assignment vectors.
//!
//! The orchestrator only sees the [`SamplingStrategy`] trait; the three
//! built-in strategies are selected from the `uq.method` token.

mod lhs;
mod monte_carlo;
mod smolyak;

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use serde::{Deserialize, Serialize};

use crate::parameters::Parameter;

pub use lhs::LatinHypercube;
pub use monte_carlo::MonteCarlo;
pub use smolyak::SmolyakSparseGrid;

/// Highest accepted sparse grid level; the finest 1-D rule has `2^16 + 1` nodes.
pub const MAX_SMOLYAK_LEVEL: u32 = 16;

/// Finite set of assignment vectors, each index-aligned with the parameters
/// it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingPlan {
    parameter_ids: Vec<String>,
    points: Vec<Vec<f64>>,
}

impl SamplingPlan {
    /// Wraps generated points, checking every vector has one value per parameter.
    pub fn new(parameters: &[Parameter], points: Vec<Vec<f64>>) -> Result<Self, CapError> {
        if let Some((index, point)) = points
            .iter()
            .enumerate()
            .find(|(_, point)| point.len() != parameters.len())
        {
            return Err(CapError::Config(
                ErrorInfo::new("uq.plan_arity", "assignment vector size differs from parameter count")
                    .with_context("point", index.to_string())
                    .with_context("expected", parameters.len().to_string())
                    .with_context("actual", point.len().to_string()),
            ));
        }
        Ok(Self {
            parameter_ids: parameters.iter().map(|param| param.id.clone()).collect(),
            points,
        })
    }

    pub fn parameter_ids(&self) -> &[String] {
        &self.parameter_ids
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterates over assignment vectors in generation order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[f64]> + '_ {
        self.points.iter().map(Vec::as_slice)
    }

    /// Values of the parameter at `column` across the plan.
    pub fn column(&self, column: usize) -> Vec<f64> {
        self.points.iter().map(|point| point[column]).collect()
    }
}

/// Capability generating a sampling plan for a parameter set.
pub trait SamplingStrategy: Send + Sync {
    /// Short label used in logs and reports.
    fn label(&self) -> &'static str;

    /// Generates the plan. Deterministic for a given strategy value.
    fn generate(&self, parameters: &[Parameter]) -> Result<SamplingPlan, CapError>;
}

/// Method token and its method-specific settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum SamplingMethod {
    /// Smolyak sparse grid up to `level`.
    SmolyakSparseGrid { level: u32 },
    /// `samples` independent draws.
    MonteCarlo { samples: usize },
    /// `samples` stratified draws.
    LatinHypercubeSampling { samples: usize },
}

/// Sampling method plus the master seed shared by the random strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingSettings {
    #[serde(flatten)]
    pub method: SamplingMethod,
    #[serde(default)]
    pub seed: u64,
}

fn non_negative(uq: &PropertyTree, key: &str) -> Result<u64, CapError> {
    let value = uq.get_int(key)?;
    u64::try_from(value).map_err(|_| {
        CapError::Config(
            ErrorInfo::new("uq.negative_setting", format!("{key} must be non-negative"))
                .with_context(key, value.to_string()),
        )
    })
}

impl SamplingSettings {
    /// Reads `method`, its settings and the optional `seed` from the `uq` subtree.
    pub fn from_tree(uq: &PropertyTree) -> Result<Self, CapError> {
        let token = uq.get_string("method")?;
        let method = match token.as_str() {
            "SmolyakSparseGrid" | "Smolyak" => {
                let level = non_negative(uq, "level")?;
                SamplingMethod::SmolyakSparseGrid {
                    level: u32::try_from(level)
                        .ok()
                        .filter(|level| *level <= MAX_SMOLYAK_LEVEL)
                        .ok_or_else(|| smolyak::level_error(level))?,
                }
            }
            "MonteCarlo" => SamplingMethod::MonteCarlo {
                samples: non_negative(uq, "samples")? as usize,
            },
            "LatinHypercubeSampling" | "LHS" => SamplingMethod::LatinHypercubeSampling {
                samples: non_negative(uq, "samples")? as usize,
            },
            other => {
                return Err(CapError::Unsupported(
                    ErrorInfo::new("uq.unsupported_method", format!("invalid UQ method {other}"))
                        .with_context("method", other)
                        .with_hint("expected SmolyakSparseGrid, MonteCarlo or LatinHypercubeSampling"),
                ))
            }
        };
        let seed = uq.get_int_with_default_value("seed", 0)? as u64;
        Ok(Self { method, seed })
    }

    /// Binds the settings to the matching built-in strategy.
    pub fn strategy(&self) -> Box<dyn SamplingStrategy> {
        match self.method {
            SamplingMethod::SmolyakSparseGrid { level } => Box::new(SmolyakSparseGrid::new(level)),
            SamplingMethod::MonteCarlo { samples } => Box::new(MonteCarlo::new(samples, self.seed)),
            SamplingMethod::LatinHypercubeSampling { samples } => {
                Box::new(LatinHypercube::new(samples, self.seed))
            }
        }
    }
}
