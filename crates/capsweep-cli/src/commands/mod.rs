pub mod measure_impedance;
pub mod overrides;
pub mod simulate_device;
pub mod sweep;
