use std::collections::BTreeSet;
use std::f64::consts::PI;

use capsweep_core::{CapError, ErrorInfo};

use super::{SamplingPlan, SamplingStrategy, MAX_SMOLYAK_LEVEL};
use crate::parameters::{uniform_point, Distribution, Parameter};

/// Half-width, in standard deviations, of the interval a normal parameter's
/// grid is laid over.
const NORMAL_SPAN: f64 = 3.0;

/// Smolyak sparse grid over nested Clenshaw-Curtis rules.
///
/// Level 0 of the 1-D rule is the centre point; level `i > 0` has `2^i + 1`
/// nodes. The grid is the union of the tensor products whose levels sum to at
/// most `level`, so two parameters at level 2 give 13 points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmolyakSparseGrid {
    level: u32,
}

impl SmolyakSparseGrid {
    pub fn new(level: u32) -> Self {
        Self { level }
    }
}

pub(super) fn level_error(level: u64) -> CapError {
    CapError::Config(
        ErrorInfo::new("uq.invalid_level", format!("sparse grid level {level} is too large"))
            .with_context("level", level.to_string())
            .with_hint(format!("use a level between 0 and {MAX_SMOLYAK_LEVEL}")),
    )
}

fn clenshaw_curtis(level: u32) -> Vec<f64> {
    if level == 0 {
        return vec![0.0];
    }
    let intervals = 1usize << level;
    (0..=intervals)
        .map(|j| {
            let x = -(PI * j as f64 / intervals as f64).cos();
            if x.abs() < 1e-14 {
                0.0
            } else {
                x
            }
        })
        .collect()
}

fn multi_indices(dims: usize, budget: u32, prefix: &mut Vec<u32>, out: &mut Vec<Vec<u32>>) {
    if prefix.len() == dims {
        out.push(prefix.clone());
        return;
    }
    for level in 0..=budget {
        prefix.push(level);
        multi_indices(dims, budget - level, prefix, out);
        prefix.pop();
    }
}

fn tensor_product(rules: &[Vec<f64>]) -> Vec<Vec<f64>> {
    rules.iter().fold(vec![Vec::new()], |acc, nodes| {
        acc.into_iter()
            .flat_map(|point| {
                nodes.iter().map(move |node| {
                    let mut next = point.clone();
                    next.push(*node);
                    next
                })
            })
            .collect()
    })
}

fn map_to_support(node: f64, distribution: &Distribution) -> f64 {
    match *distribution {
        Distribution::Uniform { min, max } => uniform_point(min, max, (node + 1.0) * 0.5),
        Distribution::Normal { mean, dev } => mean + NORMAL_SPAN * dev * node,
    }
}

impl SamplingStrategy for SmolyakSparseGrid {
    fn label(&self) -> &'static str {
        "smolyak"
    }

    fn generate(&self, parameters: &[Parameter]) -> Result<SamplingPlan, CapError> {
        if self.level > MAX_SMOLYAK_LEVEL {
            return Err(level_error(u64::from(self.level)));
        }
        if parameters.is_empty() {
            return SamplingPlan::new(parameters, Vec::new());
        }
        let rules: Vec<Vec<f64>> = (0..=self.level).map(clenshaw_curtis).collect();
        let mut indices = Vec::new();
        multi_indices(parameters.len(), self.level, &mut Vec::new(), &mut indices);

        let mut seen = BTreeSet::new();
        let mut points = Vec::new();
        for index in indices {
            let factors: Vec<Vec<f64>> = index
                .iter()
                .map(|level| rules[*level as usize].clone())
                .collect();
            for node in tensor_product(&factors) {
                let key: Vec<i64> = node.iter().map(|x| (x * 1e12).round() as i64).collect();
                if seen.insert(key) {
                    points.push(
                        node.iter()
                            .zip(parameters)
                            .map(|(x, param)| map_to_support(*x, &param.distribution))
                            .collect(),
                    );
                }
            }
        }
        SamplingPlan::new(parameters, points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(index: usize) -> Parameter {
        Parameter {
            id: Parameter::id_for(index),
            name: format!("p{index}"),
            distribution: Distribution::Uniform { min: 0.0, max: 2.0 },
        }
    }

    #[test]
    fn classic_point_counts() {
        let two = [uniform(0), uniform(1)];
        assert_eq!(SmolyakSparseGrid::new(0).generate(&two).unwrap().len(), 1);
        assert_eq!(SmolyakSparseGrid::new(1).generate(&two).unwrap().len(), 5);
        assert_eq!(SmolyakSparseGrid::new(2).generate(&two).unwrap().len(), 13);
        let three = [uniform(0), uniform(1), uniform(2)];
        assert_eq!(SmolyakSparseGrid::new(1).generate(&three).unwrap().len(), 7);
    }

    #[test]
    fn first_point_is_the_centre() {
        let plan = SmolyakSparseGrid::new(2).generate(&[uniform(0)]).unwrap();
        assert_eq!(plan.iter().next().unwrap(), &[1.0]);
    }

    #[test]
    fn normal_grid_is_centred_on_mean() {
        let param = Parameter {
            id: Parameter::id_for(0),
            name: "n".into(),
            distribution: Distribution::Normal { mean: 5.0, dev: 0.5 },
        };
        let plan = SmolyakSparseGrid::new(1).generate(&[param]).unwrap();
        let mut values = plan.column(0);
        values.sort_by(f64::total_cmp);
        assert_eq!(values, vec![3.5, 5.0, 6.5]);
    }

    #[test]
    fn oversized_level_is_rejected_without_building_rules() {
        let err = SmolyakSparseGrid::new(64).generate(&[uniform(0)]).unwrap_err();
        assert_eq!(err.info().code, "uq.invalid_level");
        assert_eq!(err.info().context["level"], "64");
    }
}
