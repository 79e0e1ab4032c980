// Node and consensus configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Consensus and mining parameters.
///
/// Every field has a default, so a JSON file only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Difficulty of the synthetic predecessor used for the first mined block
    pub initial_difficulty: u64,
    /// Retarget floor
    pub minimum_difficulty: u64,
    /// Retarget ceiling
    pub maximum_difficulty: u64,
    /// Mean block-production time the retarget aims for
    #[serde(with = "duration_secs")]
    pub target_block_time: Duration,
    /// Largest factor one retarget may move difficulty, up or down
    pub max_retarget_step: u64,
    /// Quorum is ceil(miner_count / quorum_divisor)
    pub quorum_divisor: u64,
    pub base_block_reward: f64,
    /// Per-miner decay of the block reward
    pub reward_decay: f64,
    /// Nonces tried per outer search attempt before resyncing with the pool
    pub nonces_per_round: u64,
    /// Nonces between polls of the tip-change signal
    pub cancel_check_interval: u64,
    #[serde(with = "duration_secs")]
    pub peer_timeout: Duration,
    /// Upper bound on concurrent attestation requests
    pub attestation_fanout: usize,
    /// How far ahead of local time a block timestamp may be and still be attested
    #[serde(with = "duration_secs")]
    pub max_future_drift: Duration,
    /// Pause before retrying after the pool ran dry
    #[serde(with = "duration_secs")]
    pub pool_dry_backoff: Duration,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            initial_difficulty: 50_000,
            minimum_difficulty: 50_000,
            maximum_difficulty: u64::MAX,
            target_block_time: Duration::from_secs(60),
            max_retarget_step: 4,
            quorum_divisor: 5,
            base_block_reward: 1.0,
            reward_decay: 0.95,
            nonces_per_round: 10_000,
            cancel_check_interval: 1_024,
            peer_timeout: Duration::from_secs(5),
            attestation_fanout: 8,
            max_future_drift: Duration::from_secs(2 * 60 * 60),
            pool_dry_backoff: Duration::from_secs(5),
        }
    }
}

impl ConsensusParams {
    /// Load parameters from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let data = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config {}: {}", path.as_ref().display(), e))?;
        let params: Self =
            serde_json::from_str(&data).map_err(|e| format!("Invalid config: {}", e))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject values that would stall or break the engines
    pub fn validate(&self) -> Result<(), String> {
        if self.minimum_difficulty == 0 || self.initial_difficulty == 0 {
            return Err("difficulty floor and initial difficulty must be positive".to_string());
        }
        if self.minimum_difficulty > self.maximum_difficulty {
            return Err("minimum_difficulty exceeds maximum_difficulty".to_string());
        }
        if self.max_retarget_step == 0 {
            return Err("max_retarget_step must be positive".to_string());
        }
        if self.quorum_divisor == 0 {
            return Err("quorum_divisor must be positive".to_string());
        }
        if self.target_block_time.is_zero() {
            return Err("target_block_time must be positive".to_string());
        }
        if !(self.reward_decay > 0.0 && self.reward_decay < 1.0) {
            return Err("reward_decay must lie strictly between 0 and 1".to_string());
        }
        if self.nonces_per_round == 0 || self.cancel_check_interval == 0 {
            return Err("nonces_per_round and cancel_check_interval must be positive".to_string());
        }
        if self.attestation_fanout == 0 {
            return Err("attestation_fanout must be positive".to_string());
        }
        Ok(())
    }
}

/// Runtime configuration of a node process
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen_addr: SocketAddr,
    pub peers: Vec<SocketAddr>,
    pub data_dir: PathBuf,
    pub mine: bool,
    pub params: ConsensusParams,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
