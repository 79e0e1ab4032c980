// Block production: candidate assembly, proof-of-work search, attestation

use crate::chain::{IntegrityError, NodeState, SharedState};
use crate::config::ConsensusParams;
use crate::consensus::pow::{Miner, RoundOutcome};
use crate::consensus::reward::RewardSchedule;
use crate::consensus::time_verification::TimeVerificationProtocol;
use crate::consensus::validation::VerifierSet;
use crate::core::{Block, Hash256, MinerKey, now_nanos};
use crate::network::PeerTransport;
use crate::wallet::Identity;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

/// Why an attempt ended without a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    PoolDry,
    QuorumFailed,
    /// Integrity violation or a dead search worker
    Fault,
}

/// Lifecycle of one `create_block` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningPhase {
    Idle,
    Preparing,
    Searching,
    Verifying,
    Done,
    Aborted(AbortReason),
}

#[derive(Debug, thiserror::Error)]
pub enum MiningError {
    /// Nothing to mine; retry later
    #[error("transaction pool is dry")]
    PoolDry,
    /// A verifier set stayed below quorum; the candidate is discarded
    #[error("{set} time verification quorum not reached: {obtained} of {required}")]
    QuorumFailed {
        set: VerifierSet,
        obtained: usize,
        required: usize,
    },
    #[error("chain integrity violated: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("proof-of-work worker stopped unexpectedly")]
    Interrupted,
}

impl MiningError {
    /// Fatal errors must stop block production
    pub fn is_fatal(&self) -> bool {
        matches!(self, MiningError::Integrity(_))
    }

    fn abort_reason(&self) -> AbortReason {
        match self {
            MiningError::PoolDry => AbortReason::PoolDry,
            MiningError::QuorumFailed { .. } => AbortReason::QuorumFailed,
            MiningError::Integrity(_) | MiningError::Interrupted => AbortReason::Fault,
        }
    }
}

/// Assemble a fresh candidate on the current tip from every pending
/// transaction, flagging them as being mined.
pub fn build_candidate(state: &mut NodeState, miner: &MinerKey) -> Result<Block, MiningError> {
    state.chain.check_tip_link()?;
    state.pool.prune_finalized();

    let transactions = state.pool.snapshot();
    if transactions.is_empty() {
        return Err(MiningError::PoolDry);
    }
    state.pool.mark_mining(&transactions);

    let difficulty = state
        .validator()
        .difficulty_engine()
        .difficulty_for_next_block(&state.chain);
    // Never older than the block it extends
    let timestamp = now_nanos().max(state.chain.tip().timestamp);

    Ok(Block::candidate(
        miner.clone(),
        transactions,
        difficulty,
        timestamp,
        state.chain.tip_hash(),
    ))
}

/// Bring a candidate in line with the current tip and pool.
///
/// Transactions finalized elsewhere since the last round are dropped and
/// new submissions picked up. Returns whether the candidate was rebuilt;
/// a rebuilt candidate restarts at nonce zero with no attestations.
pub fn resync(state: &mut NodeState, block: &mut Block) -> Result<bool, MiningError> {
    state.chain.check_tip_link()?;
    state.pool.prune_finalized();

    if state.chain.tip_hash() == block.previous_block_hash
        && state.pool.transactions() == block.transactions.as_slice()
    {
        return Ok(false);
    }

    state.pool.release(&block.transactions);
    *block = build_candidate(state, &block.miner)?;
    Ok(true)
}

#[derive(Debug, PartialEq, Eq)]
enum SearchOutcome {
    Found,
    /// The candidate changed and needs fresh pre-mining attestations
    Rebuilt,
}

pub struct MiningEngine<T: PeerTransport> {
    state: SharedState,
    identity: Arc<Identity>,
    protocol: TimeVerificationProtocol<T>,
    reward: RewardSchedule,
    nonces_per_round: u64,
    cancel_check_interval: u64,
    phase: watch::Sender<MiningPhase>,
}

impl<T: PeerTransport> MiningEngine<T> {
    pub fn new(
        state: SharedState,
        identity: Arc<Identity>,
        protocol: TimeVerificationProtocol<T>,
        params: &ConsensusParams,
    ) -> Self {
        let (phase, _) = watch::channel(MiningPhase::Idle);
        Self {
            state,
            identity,
            protocol,
            reward: RewardSchedule::new(params),
            nonces_per_round: params.nonces_per_round.max(1),
            cancel_check_interval: params.cancel_check_interval.max(1),
            phase,
        }
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<MiningPhase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> MiningPhase {
        *self.phase.borrow()
    }

    pub fn protocol(&self) -> &TimeVerificationProtocol<T> {
        &self.protocol
    }

    fn set_phase(&self, phase: MiningPhase) {
        log::debug!("Mining phase: {:?}", phase);
        self.phase.send_replace(phase);
    }

    /// Produce one attested block from the pending transactions.
    ///
    /// The returned block extends the tip current at completion and its
    /// transactions are already finalized in the pool. The caller appends
    /// it through `NodeState::accept_block`.
    pub async fn create_block(&self) -> Result<Block, MiningError> {
        let result = self.run_attempt().await;
        match &result {
            Ok(_) => self.set_phase(MiningPhase::Done),
            Err(e) => {
                log::info!("Mining attempt aborted: {}", e);
                self.set_phase(MiningPhase::Aborted(e.abort_reason()));
            }
        }
        result
    }

    async fn run_attempt(&self) -> Result<Block, MiningError> {
        let started = Instant::now();
        self.set_phase(MiningPhase::Preparing);

        let (mut block, mut tip_rx) = {
            let mut state = self.state.write().await;
            let tip_rx = state.subscribe_tip();
            (build_candidate(&mut state, &self.identity.miner_key())?, tip_rx)
        };

        match self.search_and_verify(&mut block, &mut tip_rx, started).await {
            Ok(()) => Ok(block),
            Err(e) => {
                self.state.write().await.pool.release(&block.transactions);
                Err(e)
            }
        }
    }

    async fn search_and_verify(
        &self,
        block: &mut Block,
        tip_rx: &mut watch::Receiver<Hash256>,
        started: Instant,
    ) -> Result<(), MiningError> {
        let mut miner = Miner::new();

        loop {
            let mut pre_quorum = self.attest_candidate(block).await.is_ok();

            self.set_phase(MiningPhase::Searching);
            log::info!(
                "Mining block with {} transactions at difficulty {}",
                block.transactions.len(),
                block.difficulty
            );
            let outcome = self.search(block, &mut miner, tip_rx, &mut pre_quorum).await?;
            if outcome == SearchOutcome::Rebuilt {
                continue;
            }

            self.set_phase(MiningPhase::Verifying);
            block.mining_time = started.elapsed();
            let round = self.protocol.collect_attestations(block).await;

            let mut state = self.state.write().await;
            if state.chain.tip_hash() != block.previous_block_hash {
                log::info!("Tip moved during verification, rebuilding candidate");
                tip_rx.borrow_and_update();
                resync(&mut state, block)?;
                continue;
            }

            if !round.has_quorum() {
                return Err(MiningError::QuorumFailed {
                    set: VerifierSet::PostMining,
                    obtained: round.obtained(),
                    required: round.required,
                });
            }

            let (verifiers, signatures) = round.into_verifier_sets();
            block.time_verifiers = verifiers;
            block.time_verifier_signatures = signatures;

            state.pool.mark_mined(&block.transactions);
            state.pool.prune_finalized();

            let miners = state.chain.miner_count(state.chain.height()) as u64;
            log::info!(
                "Mined block {} in {:.2}s after {} hashes, reward {:.6}",
                block.hash(),
                block.mining_time.as_secs_f64(),
                miner.attempts(),
                self.reward.block_reward(miners)
            );
            return Ok(());
        }
    }

    /// Gather the pre-search quorum for the current candidate. A shortfall
    /// does not stop the search: the set is collected again between rounds
    /// until it reaches quorum.
    async fn attest_candidate(&self, block: &mut Block) -> Result<(), MiningError> {
        let round = self.protocol.collect_attestations(block).await;
        let shortfall = (!round.has_quorum()).then(|| MiningError::QuorumFailed {
            set: VerifierSet::PreMining,
            obtained: round.obtained(),
            required: round.required,
        });
        if let Some(e) = &shortfall {
            log::warn!("Pre-mining attestation short: {}", e);
        }

        let (verifiers, signatures) = round.into_verifier_sets();
        block.pre_mining_time_verifiers = verifiers;
        block.pre_mining_time_verifier_signatures = signatures;
        shortfall.map_or(Ok(()), Err)
    }

    /// Run search rounds on a blocking worker until a nonce is found or the
    /// candidate has to be rebuilt. Between rounds the candidate is resynced
    /// with the pool and tip, and a short pre-mining set is collected again.
    async fn search(
        &self,
        block: &mut Block,
        miner: &mut Miner,
        tip_rx: &mut watch::Receiver<Hash256>,
        pre_quorum: &mut bool,
    ) -> Result<SearchOutcome, MiningError> {
        loop {
            let mut work = block.clone();
            let mut worker = std::mem::take(miner);
            let interrupt = tip_rx.clone();
            let nonces = self.nonces_per_round;
            let check_every = self.cancel_check_interval;

            let (work, worker, outcome) = tokio::task::spawn_blocking(move || {
                let outcome = worker.mine_round(&mut work, nonces, check_every, || {
                    interrupt.has_changed().unwrap_or(false)
                });
                (work, worker, outcome)
            })
            .await
            .map_err(|_| MiningError::Interrupted)?;

            *block = work;
            *miner = worker;

            if let RoundOutcome::Found(hash) = outcome {
                if *pre_quorum {
                    log::debug!("Found nonce {} ({})", block.nonce, hash);
                    return Ok(SearchOutcome::Found);
                }
                // The pre-mining set is sealed into the hash, so refilling it spends this nonce
                log::info!("Nonce found with the pre-mining set short, attesting again");
                self.attest_candidate(block).await?;
                *pre_quorum = true;
                continue;
            }

            let rebuilt = {
                let mut state = self.state.write().await;
                tip_rx.borrow_and_update();
                resync(&mut state, block)?
            };
            if rebuilt {
                log::info!("Candidate rebuilt on tip {}", block.previous_block_hash);
                return Ok(SearchOutcome::Rebuilt);
            }
            if !*pre_quorum {
                *pre_quorum = self.attest_candidate(block).await.is_ok();
            }
        }
    }
}
