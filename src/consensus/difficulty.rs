// Difficulty retargeting

use crate::chain::ChainStore;
use crate::config::ConsensusParams;
use std::time::Duration;

/// Mining time assumed for the synthetic predecessor of the first mined block
pub const BOOTSTRAP_MINING_TIME: Duration = Duration::from_secs(60);

/// Ratio-based retarget toward a fixed mean block time:
///
/// `next = clamp(prev * target / actual, prev / step, prev * step)`,
/// then clamped into `[minimum, maximum]`.
///
/// An observed time of zero counts as the largest upward step.
#[derive(Debug, Clone)]
pub struct DifficultyEngine {
    target_block_time: Duration,
    initial: u64,
    minimum: u64,
    maximum: u64,
    max_step: u64,
}

impl DifficultyEngine {
    pub fn new(params: &ConsensusParams) -> Self {
        Self {
            target_block_time: params.target_block_time,
            initial: params.initial_difficulty,
            minimum: params.minimum_difficulty.max(1),
            maximum: params.maximum_difficulty.max(params.minimum_difficulty.max(1)),
            max_step: params.max_retarget_step.max(1),
        }
    }

    pub fn next_difficulty(&self, previous_mining_time: Duration, previous_difficulty: u64) -> u64 {
        let previous = previous_difficulty.max(1) as u128;
        let step = self.max_step as u128;
        let upper = previous.saturating_mul(step);
        let lower = (previous / step).max(1);

        let actual = previous_mining_time.as_nanos();
        let scaled = if actual == 0 {
            upper
        } else {
            (previous.saturating_mul(self.target_block_time.as_nanos()) / actual).clamp(lower, upper)
        };

        scaled.clamp(self.minimum as u128, self.maximum as u128) as u64
    }

    /// Difficulty the next block on `chain` must carry
    pub fn difficulty_for_next_block(&self, chain: &ChainStore) -> u64 {
        match chain.last_mined_block() {
            Some(previous) => self.next_difficulty(previous.mining_time, previous.difficulty),
            None => self.next_difficulty(BOOTSTRAP_MINING_TIME, self.initial),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(minimum: u64) -> DifficultyEngine {
        DifficultyEngine::new(&ConsensusParams {
            minimum_difficulty: minimum,
            initial_difficulty: minimum,
            ..ConsensusParams::default()
        })
    }

    #[test]
    fn test_on_target_keeps_difficulty() {
        let engine = engine(1);
        assert_eq!(engine.next_difficulty(Duration::from_secs(60), 80_000), 80_000);
    }

    #[test]
    fn test_proportional_adjustment() {
        let engine = engine(1);
        // Twice as fast as the target doubles difficulty
        assert_eq!(engine.next_difficulty(Duration::from_secs(30), 80_000), 160_000);
        // Twice as slow halves it
        assert_eq!(engine.next_difficulty(Duration::from_secs(120), 80_000), 40_000);
    }

    #[test]
    fn test_step_is_bounded() {
        let engine = engine(1);
        assert_eq!(engine.next_difficulty(Duration::from_secs(1), 80_000), 320_000);
        assert_eq!(engine.next_difficulty(Duration::from_secs(6_000), 80_000), 20_000);
    }

    #[test]
    fn test_zero_mining_time_is_max_step() {
        let engine = engine(1);
        assert_eq!(engine.next_difficulty(Duration::ZERO, 80_000), 320_000);
        assert_eq!(engine.next_difficulty(Duration::ZERO, u64::MAX), u64::MAX);
    }

    #[test]
    fn test_floor_is_respected() {
        let engine = engine(50_000);
        assert_eq!(engine.next_difficulty(Duration::from_secs(600), 50_000), 50_000);
        assert_eq!(engine.next_difficulty(Duration::from_secs(60), 0), 50_000);
    }

    #[test]
    fn test_monotonic_in_speed_ratio() {
        let engine = engine(1_000);
        let mut last = 0;
        // Observed times shrinking means target/actual grows
        for millis in [600_000u64, 240_000, 120_000, 60_000, 45_000, 30_000, 15_000, 1, 0] {
            let next = engine.next_difficulty(Duration::from_millis(millis), 100_000);
            assert!(next >= last, "{} < {} at {}ms", next, last, millis);
            assert!(next >= 1_000);
            last = next;
        }
    }

    #[test]
    fn test_bootstrap_uses_initial_difficulty() {
        let engine = DifficultyEngine::new(&ConsensusParams::default());
        let chain = ChainStore::new();
        assert_eq!(engine.difficulty_for_next_block(&chain), 50_000);
    }
}
