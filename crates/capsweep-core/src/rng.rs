//! Seeded random streams for the sampling strategies.

use std::hash::Hasher;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use siphasher::sip::SipHasher13;

/// Random stream keyed by the sweep seed.
///
/// Every parameter column draws from `substream(seed, column)`, so adding a
/// parameter to a sweep leaves the draws of the existing columns untouched.
#[derive(Debug, Clone)]
pub struct RngHandle {
    rng: StdRng,
}

impl RngHandle {
    /// Stream seeded directly with `seed`.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Stream for column `substream` of a sweep seeded with `master_seed`.
    pub fn substream(master_seed: u64, substream: u64) -> Self {
        Self::from_seed(derive_substream_seed(master_seed, substream))
    }
}

impl RngCore for RngHandle {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.rng.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.rng.try_fill_bytes(dest)
    }
}

/// SipHash-1-3 with zero keys over `(master_seed, substream)`; stable across
/// platforms and releases.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
