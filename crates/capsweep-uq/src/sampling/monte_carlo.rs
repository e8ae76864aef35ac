use capsweep_core::{CapError, ErrorInfo, RngHandle};
use rand::Rng;
use rand_distr::{Distribution as _, Normal};

use super::{SamplingPlan, SamplingStrategy};
use crate::parameters::{uniform_point, Distribution, Parameter};

/// Independent draws, each parameter from its own seeded substream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonteCarlo {
    samples: usize,
    seed: u64,
}

impl MonteCarlo {
    pub fn new(samples: usize, seed: u64) -> Self {
        Self { samples, seed }
    }
}

pub(super) fn normal_for(param: &Parameter, mean: f64, dev: f64) -> Result<Normal<f64>, CapError> {
    Normal::new(mean, dev).map_err(|err| {
        CapError::Config(
            ErrorInfo::new("uq.invalid_normal", err.to_string())
                .with_context("param", param.id.clone())
                .with_context("standard_deviation", dev.to_string()),
        )
    })
}

impl SamplingStrategy for MonteCarlo {
    fn label(&self) -> &'static str {
        "monte-carlo"
    }

    fn generate(&self, parameters: &[Parameter]) -> Result<SamplingPlan, CapError> {
        let mut points = vec![Vec::with_capacity(parameters.len()); self.samples];
        for (column, param) in parameters.iter().enumerate() {
            let mut rng = RngHandle::substream(self.seed, column as u64);
            match param.distribution {
                Distribution::Uniform { min, max } => {
                    for point in points.iter_mut() {
                        let u: f64 = rng.gen();
                        point.push(uniform_point(min, max, u));
                    }
                }
                Distribution::Normal { mean, dev } => {
                    let normal = normal_for(param, mean, dev)?;
                    for point in points.iter_mut() {
                        point.push(normal.sample(&mut rng));
                    }
                }
            }
        }
        SamplingPlan::new(parameters, points)
    }
}
