// Storage layer for the chain and the pending-transaction pool

mod blockchain_db;
mod pool_db;

pub use blockchain_db::BlockchainDB;
pub use pool_db::PoolDB;

use crate::chain::{ChainStore, IntegrityError, NodeState, TransactionPool};
use crate::config::ConsensusParams;
use crate::core::CodecError;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("stored record is malformed: {0}")]
    Codec(#[from] CodecError),
    #[error("stored chain is corrupt: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("storage is corrupt: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// A corrupt chain must not be mined on
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Integrity(_) | StorageError::Corrupt(_))
    }
}

/// Storage manager - combines the blockchain DB and the pool snapshot
pub struct Storage {
    pub blockchain: BlockchainDB,
    pub pool: PoolDB,
}

impl Storage {
    /// Create a new storage instance
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let blockchain = BlockchainDB::new(path.as_ref().join("blocks"))?;
        let pool = PoolDB::new(path.as_ref().join("pool"))?;

        Ok(Self { blockchain, pool })
    }

    /// Create an in-memory storage (for testing)
    pub fn memory() -> Result<Self, StorageError> {
        Ok(Self {
            blockchain: BlockchainDB::memory()?,
            pool: PoolDB::memory()?,
        })
    }

    /// Persist the chain and pool. Blocks are append-only, so only those
    /// past the stored height are written.
    pub fn save_snapshot(&self, state: &NodeState) -> Result<(), StorageError> {
        let blocks = state.chain.blocks();
        let mut stored = self.blockchain.get_chain_height()?;
        if stored > blocks.len() as u64 {
            log::warn!(
                "Stored chain ({} blocks) is longer than the live chain ({}), rewriting",
                stored,
                blocks.len()
            );
            self.blockchain.clear()?;
            stored = 0;
        }

        for (height, block) in blocks.iter().enumerate().skip(stored as usize) {
            self.blockchain.store_block(height as u64, block)?;
        }
        self.blockchain.store_chain_height(blocks.len() as u64)?;
        self.blockchain.store_tip(&state.chain.tip_hash())?;
        self.pool.replace_all(state.pool.transactions())?;

        self.blockchain.flush()?;
        self.pool.flush()?;

        log::debug!(
            "Saved snapshot: {} blocks, {} pending transactions",
            blocks.len(),
            state.pool.len()
        );
        Ok(())
    }

    /// Rebuild node state from the stored snapshot, re-checking every
    /// chain link. `None` when nothing has been stored yet.
    pub fn load_snapshot(&self, params: ConsensusParams) -> Result<Option<NodeState>, StorageError> {
        let blocks = self.blockchain.load_blocks()?;
        if blocks.is_empty() {
            return Ok(None);
        }

        let chain = ChainStore::from_blocks(blocks)?;
        chain.verify_integrity()?;
        if self.blockchain.get_tip()? != Some(chain.tip_hash()) {
            return Err(StorageError::Integrity(IntegrityError::TipMismatch));
        }

        let mut state = NodeState::from_parts(chain, TransactionPool::new(), params);
        // Transactions finalized in the chain are dropped on submission
        for tx in self.pool.load_all()? {
            state.submit_transaction(tx);
        }

        log::info!(
            "Loaded snapshot: {} blocks, {} pending transactions",
            state.chain.height(),
            state.pool.len()
        );
        Ok(Some(state))
    }
}
