//! Reads the complete sweep description from the `uq` configuration subtree.

use std::path::Path;

use capsweep_core::{CapError, PropertyTree};

use crate::hosts::ExecutionBackend;
use crate::parameters::{parameters_from_tree, Parameter};
use crate::program::ProgramDescriptor;
use crate::sampling::SamplingSettings;

/// Validated inputs of a sweep. Building one performs every setup check, so
/// an unsupported distribution, method or host never reaches dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSetup {
    pub parameters: Vec<Parameter>,
    pub settings: SamplingSettings,
    pub backend: ExecutionBackend,
    pub program: ProgramDescriptor,
}

impl SweepSetup {
    /// Reads `uq.params`, `uq.param_<i>`, `uq.method`, `uq.host` and `uq.test_program`.
    pub fn from_tree(root: &PropertyTree) -> Result<Self, CapError> {
        let uq = root.get_child("uq")?;
        let parameters = parameters_from_tree(&uq)?;
        let settings = SamplingSettings::from_tree(&uq)?;
        let backend = ExecutionBackend::from_tree(&uq.get_child("host")?)?;
        let program = ProgramDescriptor::from_tree(&uq.get_child("test_program")?, &parameters)?;
        tracing::debug!(
            params = parameters.len(),
            method = settings.strategy().label(),
            backend = backend.label(),
            "sweep setup validated"
        );
        Ok(Self {
            parameters,
            settings,
            backend,
            program,
        })
    }

    /// Loads and validates a YAML sweep description.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CapError> {
        Self::from_tree(&PropertyTree::load(path)?)
    }
}
