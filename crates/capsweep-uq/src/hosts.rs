//! Execution backends a sweep can be dispatched to.

use std::time::Duration;

use capsweep_core::{CapError, ErrorInfo, PropertyTree};
use serde::{Deserialize, Serialize};

/// Runs invocations as local processes, `cpus` at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveHost {
    #[serde(default = "InteractiveHost::default_cpus")]
    pub cpus: usize,
    /// `0` leaves the per-node count unspecified.
    #[serde(default)]
    pub cpus_per_node: usize,
}

impl InteractiveHost {
    const fn default_cpus() -> usize {
        1
    }

    /// Number of worker threads; at least one.
    pub fn workers(&self) -> usize {
        self.cpus.max(1)
    }
}

impl Default for InteractiveHost {
    fn default() -> Self {
        Self {
            cpus: Self::default_cpus(),
            cpus_per_node: 0,
        }
    }
}

/// Submits invocations as PBS batch jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PbsHost {
    /// Environment setup sourced at the top of every job script.
    pub env: String,
    #[serde(default)]
    pub cpus: usize,
    #[serde(default)]
    pub cpus_per_node: usize,
    #[serde(default = "PbsHost::default_qname")]
    pub qname: String,
    /// Passed through to the scheduler, not enforced here.
    #[serde(default = "PbsHost::default_walltime")]
    pub walltime: String,
    #[serde(default)]
    pub modules: Vec<String>,
    /// Invocations packed into one submitted job.
    #[serde(default = "PbsHost::default_pack")]
    pub pack: usize,
    /// Maximum number of jobs outstanding at once.
    #[serde(default = "PbsHost::default_qlimit")]
    pub qlimit: usize,
    #[serde(default = "PbsHost::default_poll_seconds")]
    pub poll_seconds: f64,
}

impl PbsHost {
    fn default_qname() -> String {
        "standby".to_string()
    }

    fn default_walltime() -> String {
        "1:00:00".to_string()
    }

    const fn default_pack() -> usize {
        1
    }

    const fn default_qlimit() -> usize {
        200
    }

    const fn default_poll_seconds() -> f64 {
        5.0
    }

    /// Host with every optional setting at its default.
    pub fn with_env(env: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            cpus: 0,
            cpus_per_node: 0,
            qname: Self::default_qname(),
            walltime: Self::default_walltime(),
            modules: Vec::new(),
            pack: Self::default_pack(),
            qlimit: Self::default_qlimit(),
            poll_seconds: Self::default_poll_seconds(),
        }
    }

    pub fn pack_size(&self) -> usize {
        self.pack.max(1)
    }

    pub fn queue_limit(&self) -> usize {
        self.qlimit.max(1)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.poll_seconds.max(0.0))
    }
}

/// Backend selected by `uq.host.type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionBackend {
    Interactive(InteractiveHost),
    #[serde(rename = "PBS")]
    BatchQueue(PbsHost),
}

fn count(host: &PropertyTree, key: &str, default: i64) -> Result<usize, CapError> {
    let value = host.get_int_with_default_value(key, default)?;
    usize::try_from(value).map_err(|_| {
        CapError::Config(
            ErrorInfo::new("uq.negative_setting", format!("{key} must be non-negative"))
                .with_context(key, value.to_string()),
        )
    })
}

impl ExecutionBackend {
    /// Reads the `host` subtree.
    pub fn from_tree(host: &PropertyTree) -> Result<Self, CapError> {
        let host_type = host.get_string("type")?;
        match host_type.as_str() {
            "Interactive" => Ok(Self::Interactive(InteractiveHost {
                cpus: count(host, "cpus", 1)?,
                cpus_per_node: count(host, "cpus_per_node", 0)?,
            })),
            "PBS" => Ok(Self::BatchQueue(PbsHost {
                env: host.get_string("env")?,
                cpus: count(host, "cpus", 0)?,
                cpus_per_node: count(host, "cpus_per_node", 0)?,
                qname: host.get_string_with_default_value("qname", "standby")?,
                walltime: host.get_string_with_default_value("walltime", "1:00:00")?,
                modules: host.get_string_list_with_default("modules")?,
                pack: count(host, "pack", 1)?,
                qlimit: count(host, "qlimit", 200)?,
                poll_seconds: host.get_double_with_default_value("poll_seconds", 5.0)?,
            })),
            other => Err(CapError::Unsupported(
                ErrorInfo::new("uq.unsupported_host", format!("invalid host type {other}"))
                    .with_context("host_type", other)
                    .with_hint("expected Interactive or PBS"),
            )),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Interactive(_) => "interactive",
            Self::BatchQueue(_) => "pbs",
        }
    }

    /// Upper bound on invocations or jobs in flight at any moment.
    pub fn concurrency(&self) -> usize {
        match self {
            Self::Interactive(host) => host.workers(),
            Self::BatchQueue(host) => host.queue_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pbs_defaults_match_legacy_configuration() {
        let tree = PropertyTree::parse_str("type: PBS\nenv: /opt/env.sh\n").unwrap();
        let ExecutionBackend::BatchQueue(host) = ExecutionBackend::from_tree(&tree).unwrap() else {
            panic!("expected PBS host");
        };
        assert_eq!(host, PbsHost::with_env("/opt/env.sh"));
        assert_eq!(host.qname, "standby");
        assert_eq!(host.walltime, "1:00:00");
        assert!(host.modules.is_empty());
        assert_eq!(host.pack, 1);
        assert_eq!(host.qlimit, 200);
        assert_eq!(host.cpus, 0);
    }

    #[test]
    fn interactive_defaults() {
        let tree = PropertyTree::parse_str("type: Interactive\n").unwrap();
        let backend = ExecutionBackend::from_tree(&tree).unwrap();
        assert_eq!(backend, ExecutionBackend::Interactive(InteractiveHost::default()));
        assert_eq!(backend.concurrency(), 1);
    }

    #[test]
    fn pbs_requires_env() {
        let tree = PropertyTree::parse_str("type: PBS\n").unwrap();
        let err = ExecutionBackend::from_tree(&tree).unwrap_err();
        assert_eq!(err.info().code, "config.missing_key");
    }

    #[test]
    fn unknown_host_is_unsupported() {
        let tree = PropertyTree::parse_str("type: Slurm\n").unwrap();
        let err = ExecutionBackend::from_tree(&tree).unwrap_err();
        assert!(matches!(err, CapError::Unsupported(_)));
        assert_eq!(err.info().context["host_type"], "Slurm");
    }

    #[test]
    fn negative_counts_are_rejected() {
        let tree = PropertyTree::parse_str("type: Interactive\ncpus: -2\n").unwrap();
        let err = ExecutionBackend::from_tree(&tree).unwrap_err();
        assert_eq!(err.info().code, "uq.negative_setting");
    }
}
