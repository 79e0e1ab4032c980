// Chain store, transaction pool, and the lock that serializes both

mod pool;
mod store;

pub use pool::{SubmitOutcome, TransactionPool, TxStatus};
pub use store::ChainStore;

use crate::config::ConsensusParams;
use crate::consensus::{BlockValidator, ValidationError};
use crate::core::{Block, Hash256, Transaction};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// Corruption of the stored chain. Fatal: block production must stop.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("chain does not start with the genesis block")]
    MissingGenesis,
    #[error("block at height {height} does not link to its predecessor")]
    BrokenLink { height: usize },
    #[error("cached tip hash does not match the stored tip")]
    TipMismatch,
}

/// Single source of truth for the chain, the pool and the status map.
/// Every mutation goes through `SharedState`'s lock.
pub type SharedState = Arc<RwLock<NodeState>>;

pub struct NodeState {
    pub chain: ChainStore,
    pub pool: TransactionPool,
    validator: BlockValidator,
    tip_tx: watch::Sender<Hash256>,
}

impl NodeState {
    /// Fresh state: genesis only, empty pool
    pub fn new(params: ConsensusParams) -> Self {
        Self::from_parts(ChainStore::new(), TransactionPool::new(), params)
    }

    pub fn from_parts(chain: ChainStore, pool: TransactionPool, params: ConsensusParams) -> Self {
        let (tip_tx, _) = watch::channel(chain.tip_hash());
        Self {
            chain,
            pool,
            validator: BlockValidator::new(params),
            tip_tx,
        }
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }

    /// Receiver notified with the new tip hash whenever a block is accepted
    pub fn subscribe_tip(&self) -> watch::Receiver<Hash256> {
        self.tip_tx.subscribe()
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    /// Accept a block, locally mined or received from a peer.
    ///
    /// The only chain writer: validates against the current tip, appends,
    /// finalizes the block's transactions in the pool, and raises the
    /// tip-change signal for any search in progress.
    pub fn accept_block(&mut self, block: Block) -> Result<Hash256, ValidationError> {
        self.validator.validate_block(&self.chain, &block)?;

        self.pool.mark_mined(&block.transactions);
        let pruned = self.pool.prune_finalized();
        self.chain.push(block);

        let tip = self.chain.tip_hash();
        self.tip_tx.send_replace(tip);
        log::info!(
            "Accepted block {} at height {} ({} pool entries finalized)",
            tip,
            self.chain.height() - 1,
            pruned
        );
        Ok(tip)
    }

    /// Return the transactions of a locally mined block that failed
    /// acceptance to the pool, except those the chain already finalized.
    pub fn reinstate_transactions(&mut self, block: &Block) -> usize {
        let chain = &self.chain;
        self.pool
            .reinstate(&block.transactions, |hash| chain.is_finalized(hash))
    }

    /// Submit a transaction to the pool. Transactions already finalized in
    /// the chain are ignored.
    pub fn submit_transaction(&mut self, tx: Transaction) -> SubmitOutcome {
        if self.chain.is_finalized(&tx.hash()) {
            return SubmitOutcome::Ignored(TxStatus::Mined);
        }
        self.pool.submit(tx)
    }
}
