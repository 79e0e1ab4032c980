// Proof of Work implementation

use crate::core::{Block, Hash256};
use std::time::{Duration, Instant};

/// Difficulty target: a hash passes when its top 64 bits are at most
/// `u64::MAX / difficulty`. Higher difficulty, smaller admissible range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub difficulty: u64,
    threshold: u64,
}

impl Target {
    /// Difficulty zero is treated as one (the whole range passes)
    pub fn from_difficulty(difficulty: u64) -> Self {
        Self {
            difficulty,
            threshold: u64::MAX / difficulty.max(1),
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Check if a hash meets this target
    #[inline]
    pub fn is_valid_hash(&self, hash: &Hash256) -> bool {
        hash.top64() <= self.threshold
    }
}

/// Verify that a block satisfies the proof-of-work for its own difficulty
pub fn verify(block: &Block) -> bool {
    Target::from_difficulty(block.difficulty).is_valid_hash(&block.pow_hash())
}

/// Outcome of one round of nonces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// `block.nonce` now holds the winning nonce
    Found(Hash256),
    /// Every nonce of the round failed
    Exhausted,
    /// The interrupt check fired before the round finished
    Interrupted,
}

/// Proof-of-work hasher. Keeps attempt statistics across rounds.
pub struct Miner {
    attempts: u64,
    started: Instant,
}

impl Miner {
    pub fn new() -> Self {
        Self {
            attempts: 0,
            started: Instant::now(),
        }
    }

    /// Try up to `nonces` consecutive nonces starting at `block.nonce`.
    ///
    /// `interrupted` is polled every `check_every` failed nonces; when it
    /// returns true the round stops early so the caller can resync.
    pub fn mine_round<F>(
        &mut self,
        block: &mut Block,
        nonces: u64,
        check_every: u64,
        mut interrupted: F,
    ) -> RoundOutcome
    where
        F: FnMut() -> bool,
    {
        let target = Target::from_difficulty(block.difficulty);
        let check_every = check_every.max(1);

        for tried in 1..=nonces {
            let hash = block.pow_hash();
            self.attempts += 1;

            if target.is_valid_hash(&hash) {
                return RoundOutcome::Found(hash);
            }
            block.nonce = block.nonce.wrapping_add(1);

            // Progress indicator every 100k attempts
            if self.attempts % 100_000 == 0 {
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    self.attempts,
                    self.hash_rate() / 1000.0
                );
            }

            if tried % check_every == 0 && interrupted() {
                return RoundOutcome::Interrupted;
            }
        }

        RoundOutcome::Exhausted
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Hashes per second since the miner was created
    pub fn hash_rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.attempts as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for Miner {
    fn default() -> Self {
        Self::new()
    }
}
