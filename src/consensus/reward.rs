// Diminishing block reward

use crate::config::ConsensusParams;

/// Per-miner decay of the reward
pub const REWARD_DECAY: f64 = 0.95;

/// Fraction of the base reward paid when `active_miner_count` identities
/// have mined: `0.95^n`. Underflows to 0.0 past roughly 14,500 miners.
pub fn reward_multiplier(active_miner_count: u64) -> f64 {
    REWARD_DECAY.powf(active_miner_count as f64)
}

/// Reward schedule with configurable base and decay
#[derive(Debug, Clone, Copy)]
pub struct RewardSchedule {
    pub base_block_reward: f64,
    pub decay: f64,
}

impl RewardSchedule {
    pub fn new(params: &ConsensusParams) -> Self {
        Self {
            base_block_reward: params.base_block_reward,
            decay: params.reward_decay,
        }
    }

    pub fn multiplier(&self, active_miner_count: u64) -> f64 {
        self.decay.powf(active_miner_count as f64)
    }

    /// Amount credited to the miner of a block
    pub fn block_reward(&self, active_miner_count: u64) -> f64 {
        self.base_block_reward * self.multiplier(active_miner_count)
    }
}
