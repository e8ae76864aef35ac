use capsweep_core::{CapError, MemorySink, PropertyTree};
use capsweep_device::{
    ControlMode, CustomDevice, EisSettings, EnergyStorageDevice, ImpedanceAnalyzer,
    ImpedanceQuantities, SeriesRcAnalyzer,
};

#[test]
fn device_builds_from_config_subtree() {
    let tree = PropertyTree::parse_str("device:\n  initial_voltage: 1.0\n").expect("parse");
    let mut device = CustomDevice::from_tree(&tree.get_child("device").unwrap()).expect("device");
    assert_eq!(device.get_current(), 0.0);
    assert_eq!(device.get_voltage(), 1.0);

    device.evolve(1.0, ControlMode::ConstantCurrent(2.0)).unwrap();
    assert_eq!(device.get_current(), 2.0);
    assert_eq!(device.get_voltage(), 3.0);
}

#[test]
fn missing_initial_voltage_is_a_config_error() {
    let tree = PropertyTree::parse_str("device:\n  capacitance: 2.0\n").expect("parse");
    let err = CustomDevice::from_tree(&tree.get_child("device").unwrap()).unwrap_err();
    assert!(matches!(err, CapError::Config(_)));
    assert_eq!(err.info().context["path"], "device.initial_voltage");
}

#[test]
fn constant_voltage_fails_at_any_state() {
    let mut device = CustomDevice::new(0.0);
    for step in 0..3 {
        device
            .evolve_one_time_step_constant_current(0.1, step as f64)
            .unwrap();
        let err = device
            .evolve_one_time_step_constant_voltage(0.1, 1.0)
            .unwrap_err();
        assert!(matches!(err, CapError::Unimplemented(_)));
    }
}

#[test]
fn capacitance_shapes_the_measured_spectrum() {
    let tree = PropertyTree::parse_str(
        "device:\n  initial_voltage: 0.0\n  capacitance: 4.0\neis:\n  frequency_lower_limit: 1.0\n  frequency_upper_limit: 10.0\n  steps_per_decade: 1\n",
    )
    .expect("parse");
    let mut device = CustomDevice::from_tree(&tree.get_child("device").unwrap()).unwrap();
    let settings = EisSettings::from_tree(&tree.get_child("eis").unwrap()).unwrap();
    let spectrum = SeriesRcAnalyzer::new(settings, 0.0)
        .measure(&mut device)
        .unwrap();
    assert_eq!(spectrum.frequency.len(), 2);

    let quantities = ImpedanceQuantities::from_spectrum(&spectrum);
    let expected = 1.0 / (2.0 * std::f64::consts::PI * 4.0);
    assert!((quantities.modulus[0] - expected).abs() < 1e-9);
    assert!((quantities.argument[0] + 90.0).abs() < 1e-9);

    let mut sink = MemorySink::default();
    quantities.report(&mut sink).unwrap();
    assert!(sink.arrays.values().all(|values| values.len() == 2));
}

#[test]
fn inverted_frequency_range_is_rejected() {
    let tree = PropertyTree::parse_str(
        "frequency_lower_limit: 10.0\nfrequency_upper_limit: 1.0\nsteps_per_decade: 4\n",
    )
    .expect("parse");
    let err = EisSettings::from_tree(&tree).unwrap_err();
    assert_eq!(err.info().code, "eis.invalid_range");
}
