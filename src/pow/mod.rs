//! Proof-of-work search and scoring.
//!
//! A search draws random payloads until the SHA3-256 of the unit preimage
//! starts with the requested number of zero bits. The accelerated search runs
//! the same loop on several threads and keeps the first hit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::crypto::sha3_256;
use crate::types::{now_millis, Address, Unit, UnitValue, ValidationTarget, PAYLOAD_SIZE};

/// How the search is executed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SearchMode {
    /// Single-threaded loop
    #[default]
    Standard,
    /// Parallel loop over worker threads
    Accelerated,
}

/// Unit search and valuation
pub trait ProofOfWork {
    /// Find a unit whose hash has at least `zero_bits` leading zero bits
    fn search(&self, operator: &Address, miner: &Address, zero_bits: u8) -> Unit;

    /// Same as [`ProofOfWork::search`], using every available worker
    fn accelerated_search(&self, operator: &Address, miner: &Address, zero_bits: u8) -> Unit {
        self.search(operator, miner, zero_bits)
    }

    /// Value of `unit` under `target`
    fn score(&self, unit: &Unit, target: &ValidationTarget) -> UnitValue;

    /// Hex SHA3-256 of the packed unit
    fn content_hash(&self, unit: &Unit) -> String {
        hex::encode(sha3_256(&unit.to_bytes()))
    }
}

/// A finished search
#[derive(Clone, Debug)]
pub struct SearchReport {
    /// The unit found
    pub unit: Unit,
    /// Wall-clock search time
    pub elapsed: Duration,
}

/// Run a search in `mode` and time it
pub fn timed_search(
    pow: &dyn ProofOfWork,
    mode: SearchMode,
    operator: &Address,
    miner: &Address,
    zero_bits: u8,
) -> SearchReport {
    let start = Instant::now();
    let unit = match mode {
        SearchMode::Standard => pow.search(operator, miner, zero_bits),
        SearchMode::Accelerated => pow.accelerated_search(operator, miner, zero_bits),
    };
    SearchReport {
        unit,
        elapsed: start.elapsed(),
    }
}

/// Number of leading zero bits in `hash`
#[must_use]
pub fn leading_zero_bits(hash: &[u8]) -> u32 {
    let mut bits = 0;
    for byte in hash {
        if *byte == 0 {
            bits += 8;
        } else {
            return bits + byte.leading_zeros();
        }
    }
    bits
}

/// Proof-of-work hash of a unit
#[must_use]
pub fn unit_hash(unit: &Unit) -> [u8; 32] {
    sha3_256(&unit.pow_preimage())
}

/// Whether the unit's hash meets its declared requirement
#[must_use]
pub fn meets_requirement(unit: &Unit) -> bool {
    leading_zero_bits(&unit_hash(unit)) >= u32::from(unit.required_zero_bits)
}

/// Reference SHA3-256 engine
#[derive(Clone, Debug)]
pub struct Sha3Engine {
    threads: usize,
}

impl Sha3Engine {
    /// Create an engine; `threads == 0` means available parallelism
    #[must_use]
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 {
            thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        } else {
            threads
        };
        Self { threads }
    }

    /// Worker count used by accelerated search
    #[must_use]
    pub fn threads(&self) -> usize {
        self.threads
    }

    fn search_until(
        operator: &Address,
        miner: &Address,
        zero_bits: u8,
        stop: Option<&AtomicBool>,
    ) -> Option<Unit> {
        let mut rng = ChaCha8Rng::from_entropy();
        let timestamp = now_millis().max(0) as u64;
        let mut unit = Unit::new(*operator, *miner, zero_bits, timestamp, [0u8; PAYLOAD_SIZE]);
        let mut attempts: u64 = 0;

        loop {
            rng.fill_bytes(&mut unit.payload);
            attempts += 1;
            if meets_requirement(&unit) {
                debug!(attempts, zero_bits, "unit found");
                return Some(unit);
            }
            if let Some(stop) = stop {
                if attempts % 1024 == 0 && stop.load(Ordering::Relaxed) {
                    return None;
                }
            }
        }
    }
}

impl Default for Sha3Engine {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ProofOfWork for Sha3Engine {
    fn search(&self, operator: &Address, miner: &Address, zero_bits: u8) -> Unit {
        loop {
            if let Some(unit) = Self::search_until(operator, miner, zero_bits, None) {
                return unit;
            }
        }
    }

    fn accelerated_search(&self, operator: &Address, miner: &Address, zero_bits: u8) -> Unit {
        if self.threads <= 1 {
            return self.search(operator, miner, zero_bits);
        }

        let found = AtomicBool::new(false);
        let winner = thread::scope(|scope| {
            let workers: Vec<_> = (0..self.threads)
                .map(|_| {
                    scope.spawn(|| {
                        let unit = Self::search_until(operator, miner, zero_bits, Some(&found));
                        if unit.is_some() {
                            found.store(true, Ordering::Relaxed);
                        }
                        unit
                    })
                })
                .collect();
            workers
                .into_iter()
                .filter_map(|worker| worker.join().ok().flatten())
                .next()
        });

        winner.unwrap_or_else(|| self.search(operator, miner, zero_bits))
    }

    fn score(&self, unit: &Unit, target: &ValidationTarget) -> UnitValue {
        if !meets_requirement(unit) {
            return UnitValue::Invalid;
        }
        UnitValue::from_zero_bits(unit.required_zero_bits, target)
    }
}
