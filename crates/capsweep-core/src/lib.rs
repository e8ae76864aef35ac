#![deny(missing_docs)]
#![doc = "Shared errors, configuration tree and determinism helpers for capsweep."]

pub mod config;
pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
pub mod rng;
/// Canonical JSON serde helpers.
pub mod serde;
pub mod sink;

pub use config::PropertyTree;
pub use errors::{CapError, ErrorInfo};
pub use hash::stable_hash_string;
pub use rng::{derive_substream_seed, RngHandle};
pub use serde::{from_json_slice, to_canonical_json_bytes};
pub use sink::{
    is_valid_result_name, parse_result_lines, MemorySink, ResultRecord, ResultSink, StdoutSink,
};
