use capsweep_uq::{Distribution, Parameter, SamplingMethod, SamplingSettings};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn parameters(count: usize) -> Vec<Parameter> {
    (0..count)
        .map(|index| Parameter {
            id: Parameter::id_for(index),
            name: format!("device.p{index}"),
            distribution: if index % 2 == 0 {
                Distribution::Uniform { min: 0.5, max: 1.5 }
            } else {
                Distribution::Normal { mean: 3.0, dev: 0.2 }
            },
        })
        .collect()
}

fn plan_generation_bench(c: &mut Criterion) {
    let params = parameters(6);
    let cases = [
        ("smolyak_level4_6d", SamplingMethod::SmolyakSparseGrid { level: 4 }),
        ("monte_carlo_10k_6d", SamplingMethod::MonteCarlo { samples: 10_000 }),
        ("lhs_10k_6d", SamplingMethod::LatinHypercubeSampling { samples: 10_000 }),
    ];
    for (name, method) in cases {
        let strategy = SamplingSettings { method, seed: 42 }.strategy();
        c.bench_function(name, |b| {
            b.iter(|| {
                let plan = strategy.generate(&params).unwrap();
                black_box(plan);
            });
        });
    }
}

criterion_group!(benches, plan_generation_bench);
criterion_main!(benches);
