//! Deterministic random number generation for schedule expansion.
//!
//! RULE: Schedule expansion never calls a platform RNG.
//! Every randomized distribution draws from a ScheduleRng seeded
//! from the simulation id, so expanding the same simulation twice
//! yields the same timestamps.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// A seeded RNG stream for one schedule expansion.
pub struct ScheduleRng {
    inner: Pcg64Mcg,
}

impl ScheduleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Seed a stream from a simulation id.
    pub fn for_simulation(simulation_id: &str) -> Self {
        Self::new(seed_from_id(simulation_id))
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }
}

/// Stable 64-bit FNV-1a fold of an id string.
/// NEVER change the constants — doing so reshuffles every stored schedule.
pub fn seed_from_id(id: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    id.bytes()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(b)).wrapping_mul(PRIME))
}
