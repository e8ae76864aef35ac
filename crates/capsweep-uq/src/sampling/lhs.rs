use capsweep_core::{CapError, ErrorInfo, RngHandle};
use rand::seq::SliceRandom;
use rand::Rng;
use statrs::distribution::{ContinuousCDF, Normal};

use super::{SamplingPlan, SamplingStrategy};
use crate::parameters::{uniform_point, Distribution, Parameter};

/// Latin hypercube: `samples` equal-probability strata per parameter, one
/// jittered draw per stratum, strata paired across parameters by independent
/// shuffles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatinHypercube {
    samples: usize,
    seed: u64,
}

impl LatinHypercube {
    pub fn new(samples: usize, seed: u64) -> Self {
        Self { samples, seed }
    }
}

impl SamplingStrategy for LatinHypercube {
    fn label(&self) -> &'static str {
        "lhs"
    }

    fn generate(&self, parameters: &[Parameter]) -> Result<SamplingPlan, CapError> {
        let n = self.samples;
        let mut points = vec![Vec::with_capacity(parameters.len()); n];
        for (column, param) in parameters.iter().enumerate() {
            let mut rng = RngHandle::substream(self.seed, column as u64);
            // Probabilities stay inside (0, 1) so normal quantiles are finite.
            let mut slots: Vec<f64> = (0..n)
                .map(|i| {
                    let jitter: f64 = rng.gen();
                    (i as f64 + jitter.max(f64::EPSILON)) / n as f64
                })
                .collect();
            slots.shuffle(&mut rng);
            match param.distribution {
                Distribution::Uniform { min, max } => {
                    for (point, frac) in points.iter_mut().zip(&slots) {
                        point.push(uniform_point(min, max, *frac));
                    }
                }
                Distribution::Normal { mean, dev } => {
                    let normal = Normal::new(mean, dev).map_err(|err| {
                        CapError::Config(
                            ErrorInfo::new("uq.invalid_normal", err.to_string())
                                .with_context("param", param.id.clone())
                                .with_context("standard_deviation", dev.to_string()),
                        )
                    })?;
                    for (point, frac) in points.iter_mut().zip(&slots) {
                        point.push(normal.inverse_cdf(*frac));
                    }
                }
            }
        }
        SamplingPlan::new(parameters, points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_stratum_is_hit_exactly_once() {
        let param = Parameter {
            id: Parameter::id_for(0),
            name: "u".into(),
            distribution: Distribution::Uniform { min: 0.0, max: 1.0 },
        };
        let plan = LatinHypercube::new(10, 3).generate(&[param]).unwrap();
        let mut strata: Vec<usize> = plan
            .column(0)
            .iter()
            .map(|value| (value * 10.0).floor() as usize)
            .collect();
        strata.sort_unstable();
        assert_eq!(strata, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn normal_strata_follow_the_inverse_cdf() {
        let param = Parameter {
            id: Parameter::id_for(0),
            name: "c".into(),
            distribution: Distribution::Normal { mean: 3.0, dev: 0.2 },
        };
        let plan = LatinHypercube::new(4, 11).generate(&[param]).unwrap();
        let mut values = plan.column(0);
        values.sort_by(f64::total_cmp);
        // Quartile boundaries of N(3, 0.2): 2.8651, 3.0, 3.1349.
        assert!(values[0] < 2.8652 && values[1] >= 2.8651);
        assert!(values[1] < 3.0 && values[2] >= 3.0);
        assert!(values[2] < 3.1349 && values[3] >= 3.1348);
    }

    #[test]
    fn degenerate_normal_is_rejected() {
        let param = Parameter {
            id: Parameter::id_for(2),
            name: "c".into(),
            distribution: Distribution::Normal { mean: 3.0, dev: -1.0 },
        };
        let err = LatinHypercube::new(4, 0).generate(&[param]).unwrap_err();
        assert_eq!(err.info().code, "uq.invalid_normal");
        assert_eq!(err.info().context["param"], "param_2");
    }
}
