// Consensus: difficulty, proof-of-work, rewards, validation and block production

pub mod difficulty;
pub mod mining;
pub mod pow;
pub mod reward;
pub mod time_verification;
pub mod validation;

pub use difficulty::DifficultyEngine;
pub use mining::{AbortReason, MiningEngine, MiningError, MiningPhase};
pub use pow::{Miner, RoundOutcome, Target};
pub use reward::{RewardSchedule, reward_multiplier};
pub use time_verification::{Attestation, AttestationRound, TimeVerdict, TimeVerificationProtocol};
pub use validation::{BlockValidator, ValidationError, VerifierSet, quorum_size};
