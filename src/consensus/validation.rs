// Block validation

use crate::chain::ChainStore;
use crate::config::ConsensusParams;
use crate::consensus::difficulty::DifficultyEngine;
use crate::consensus::pow;
use crate::core::{Block, Hash256, MinerKey, Signature, now_nanos, duration_to_nanos};
use crate::wallet::verify_signature;
use std::collections::HashSet;
use std::fmt;

/// Which verifier set of a block a failure refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierSet {
    PreMining,
    PostMining,
}

impl fmt::Display for VerifierSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            VerifierSet::PreMining => write!(f, "pre-mining"),
            VerifierSet::PostMining => write!(f, "post-mining"),
        }
    }
}

/// Validation error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `previous_block_hash` is not the current tip
    #[error("block extends {found}, current tip is {tip}")]
    StaleTip { tip: Hash256, found: Hash256 },
    #[error("block has no transactions")]
    NoTransactions,
    #[error("block difficulty {found} does not match the retarget value {expected}")]
    UnexpectedDifficulty { expected: u64, found: u64 },
    #[error("invalid proof of work")]
    InvalidProofOfWork,
    /// Older than the tip or too far in the future
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("transaction {0} appears twice in the block")]
    DuplicateTransaction(Hash256),
    /// Double-spend guard: the transaction is already in the chain
    #[error("transaction {0} is already finalized")]
    AlreadyFinalized(Hash256),
    #[error("{set} verifiers: {obtained} of {required} required")]
    QuorumShortfall {
        set: VerifierSet,
        obtained: usize,
        required: usize,
    },
    #[error("{0} verifier and signature counts differ")]
    MismatchedVerifierSignatures(VerifierSet),
    #[error("{0} verifier listed twice")]
    DuplicateVerifier(VerifierSet),
    /// Verifier has never mined a block on this chain
    #[error("{set} verifier {key} is not an existing miner")]
    IneligibleVerifier { set: VerifierSet, key: MinerKey },
    #[error("attestation by {0} does not verify")]
    InvalidAttestation(MinerKey),
}

/// Minimum number of attestations: `ceil(miner_count / divisor)`
pub fn quorum_size(miner_count: usize, divisor: u64) -> usize {
    miner_count.div_ceil(divisor.max(1) as usize)
}

/// Block validator
#[derive(Debug, Clone)]
pub struct BlockValidator {
    difficulty: DifficultyEngine,
    quorum_divisor: u64,
    max_future_drift: u64,
}

impl BlockValidator {
    pub fn new(params: ConsensusParams) -> Self {
        Self {
            difficulty: DifficultyEngine::new(&params),
            quorum_divisor: params.quorum_divisor,
            max_future_drift: duration_to_nanos(params.max_future_drift),
        }
    }

    pub fn difficulty_engine(&self) -> &DifficultyEngine {
        &self.difficulty
    }

    /// Attestations a block extending `chain` needs in each verifier set
    pub fn required_quorum(&self, chain: &ChainStore) -> usize {
        quorum_size(chain.miner_count(chain.height()), self.quorum_divisor)
    }

    /// Validate a block as the next block of `chain`
    pub fn validate_block(&self, chain: &ChainStore, block: &Block) -> Result<(), ValidationError> {
        if block.previous_block_hash != chain.tip_hash() {
            return Err(ValidationError::StaleTip {
                tip: chain.tip_hash(),
                found: block.previous_block_hash,
            });
        }

        // Must have at least one transaction
        if block.transactions.is_empty() {
            return Err(ValidationError::NoTransactions);
        }

        let expected = self.difficulty.difficulty_for_next_block(chain);
        if block.difficulty != expected {
            return Err(ValidationError::UnexpectedDifficulty {
                expected,
                found: block.difficulty,
            });
        }

        if !pow::verify(block) {
            return Err(ValidationError::InvalidProofOfWork);
        }

        self.validate_timestamp(chain, block.timestamp, now_nanos())?;
        self.validate_transactions(chain, block)?;
        self.validate_verifiers(chain, block)
    }

    /// Timestamp must not precede the tip nor run ahead of `now` by more
    /// than the allowed drift
    pub fn validate_timestamp(
        &self,
        chain: &ChainStore,
        timestamp: u64,
        now: u64,
    ) -> Result<(), ValidationError> {
        if timestamp < chain.tip().timestamp {
            return Err(ValidationError::InvalidTimestamp);
        }
        if timestamp > now.saturating_add(self.max_future_drift) {
            return Err(ValidationError::InvalidTimestamp);
        }
        Ok(())
    }

    fn validate_transactions(&self, chain: &ChainStore, block: &Block) -> Result<(), ValidationError> {
        let mut seen = HashSet::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let hash = tx.hash();
            if !seen.insert(hash) {
                return Err(ValidationError::DuplicateTransaction(hash));
            }
            if chain.is_finalized(&hash) {
                return Err(ValidationError::AlreadyFinalized(hash));
            }
        }
        Ok(())
    }

    /// Both verifier sets must independently reach quorum with distinct,
    /// eligible verifiers. Post-mining signatures are checked against the
    /// final block. Pre-mining signatures cover the candidate before its
    /// nonce was found, so only their shape is checked here.
    fn validate_verifiers(&self, chain: &ChainStore, block: &Block) -> Result<(), ValidationError> {
        let required = self.required_quorum(chain);

        check_set(
            chain,
            VerifierSet::PreMining,
            &block.pre_mining_time_verifiers,
            &block.pre_mining_time_verifier_signatures,
            required,
        )?;
        check_set(
            chain,
            VerifierSet::PostMining,
            &block.time_verifiers,
            &block.time_verifier_signatures,
            required,
        )?;

        let payload = block.time_verification_payload();
        for (key, signature) in block.time_verifiers.iter().zip(&block.time_verifier_signatures) {
            if !verify_signature(key, &payload, signature) {
                return Err(ValidationError::InvalidAttestation(key.clone()));
            }
        }
        Ok(())
    }
}

fn check_set(
    chain: &ChainStore,
    set: VerifierSet,
    keys: &[MinerKey],
    signatures: &[Signature],
    required: usize,
) -> Result<(), ValidationError> {
    if keys.len() != signatures.len() {
        return Err(ValidationError::MismatchedVerifierSignatures(set));
    }
    if keys.len() < required {
        return Err(ValidationError::QuorumShortfall {
            set,
            obtained: keys.len(),
            required,
        });
    }

    let mut seen = HashSet::with_capacity(keys.len());
    for key in keys {
        if !seen.insert(key) {
            return Err(ValidationError::DuplicateVerifier(set));
        }
        if chain.is_new_miner(key, chain.height()) {
            return Err(ValidationError::IneligibleVerifier {
                set,
                key: key.clone(),
            });
        }
    }
    Ok(())
}
