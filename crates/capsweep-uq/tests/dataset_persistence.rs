use std::collections::BTreeMap;
use std::fs;

use capsweep_core::{from_json_slice, PropertyTree};
use capsweep_uq::{
    AggregateDataset, CancelToken, Dispatch, FnProgram, ProcessProgram, RawOutput, Sweep,
    SweepSetup,
};

const SWEEP_YAML: &str = r#"
uq:
  params: 2
  param_0: { distribution_type: uniform, name: device.series_resistance, range: [0.05, 0.15] }
  param_1: { distribution_type: normal, name: device.capacitance, mean: 3.0, standard_deviation: 0.2 }
  method: SmolyakSparseGrid
  level: 1
  host: { type: Interactive, cpus: 2 }
  test_program:
    executable: "sh -c 'echo \"@@capsweep-result {\\\"name\\\":\\\"resistance\\\",\\\"values\\\":[$2]}\"' run"
    description: echo the first parameter back
"#;

fn sweep() -> Sweep {
    let tree = PropertyTree::parse_str(SWEEP_YAML).expect("parse sweep config");
    Sweep::from_setup(SweepSetup::from_tree(&tree).expect("setup")).expect("sweep")
}

#[test]
fn dataset_files_are_written_and_reloadable() {
    let sweep = sweep();
    let program = FnProgram::new(|assignment: &[f64]| {
        Ok(RawOutput::from([
            ("frequency".to_string(), vec![1.0, 10.0]),
            ("magnitude".to_string(), vec![assignment[0], f64::NEG_INFINITY]),
        ]))
    });
    let dataset = sweep
        .run(Dispatch::Local(&program), &CancelToken::new())
        .expect("sweep run");
    assert_eq!(dataset.succeeded, 5);

    let dir = tempfile::tempdir().expect("tmp dir");
    dataset.write_dataset(dir.path()).expect("write dataset");

    let bytes = fs::read(dir.path().join("dataset.json")).expect("read dataset.json");
    let reloaded: AggregateDataset = from_json_slice(&bytes).expect("parse dataset.json");
    assert_eq!(reloaded.header.plan_hash, sweep.plan_hash());
    assert_eq!(reloaded.run_lengths, vec![2; 5]);
    let magnitude = reloaded.array("magnitude").expect("magnitude");
    assert_eq!(magnitude.len(), 10);
    assert_eq!(magnitude[1], f64::NEG_INFINITY);

    let failures = fs::read_to_string(dir.path().join("failures.json")).expect("read failures");
    assert_eq!(failures.trim(), "[]");

    let mut reader = csv::Reader::from_path(dir.path().join("magnitude.csv")).expect("open csv");
    let headers = reader.headers().expect("headers").clone();
    assert_eq!(
        headers.iter().collect::<Vec<_>>(),
        vec!["run", "param_0", "param_1", "value_0", "value_1"]
    );
    let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>().expect("rows");
    assert_eq!(rows.len(), 5);
    assert_eq!(&rows[0][4], "-inf");
}

#[test]
fn plan_hash_is_stable_across_setups() {
    assert_eq!(sweep().plan_hash(), sweep().plan_hash());
}

#[cfg(unix)]
#[test]
fn process_program_results_flow_into_the_dataset() {
    let sweep = sweep();
    let dataset = sweep
        .run(Dispatch::Local(&ProcessProgram::default()), &CancelToken::new())
        .expect("sweep run");

    assert_eq!(dataset.failed, 0, "{:?}", dataset.failures);
    let resistance = dataset.array("resistance").expect("resistance");
    let expected: BTreeMap<usize, f64> = sweep
        .plan()
        .column(0)
        .into_iter()
        .enumerate()
        .collect();
    for (position, index) in dataset.run_indices.iter().enumerate() {
        assert_eq!(resistance[position], expected[index]);
    }
}
