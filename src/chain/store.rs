// Append-only chain of accepted blocks

use crate::chain::IntegrityError;
use crate::core::{Block, Hash256, MinerKey};
use std::collections::{HashMap, HashSet};

/// Ordered sequence of accepted blocks, seeded with genesis.
///
/// Heights are positions in the sequence: genesis is height 0, and a
/// "chain height" argument means the number of blocks considered.
#[derive(Debug, Clone)]
pub struct ChainStore {
    blocks: Vec<Block>,
    tip_hash: Hash256,
    /// Miner key -> height of the first block it mined
    first_mined: HashMap<MinerKey, usize>,
    /// Content hashes of every transaction finalized in the chain
    finalized: HashSet<Hash256>,
}

impl ChainStore {
    /// Create a chain containing only the genesis block
    pub fn new() -> Self {
        let genesis = Block::genesis();
        Self {
            tip_hash: genesis.hash(),
            blocks: vec![genesis],
            first_mined: HashMap::new(),
            finalized: HashSet::new(),
        }
    }

    /// Rebuild a chain from a loaded block sequence, checking every link
    pub fn from_blocks(blocks: Vec<Block>) -> Result<Self, IntegrityError> {
        let mut iter = blocks.into_iter();
        match iter.next() {
            Some(first) if first == Block::genesis() => {}
            _ => return Err(IntegrityError::MissingGenesis),
        }

        let mut chain = Self::new();
        for block in iter {
            if block.previous_block_hash != chain.tip_hash {
                return Err(IntegrityError::BrokenLink {
                    height: chain.height(),
                });
            }
            chain.push(block);
        }
        Ok(chain)
    }

    /// Number of blocks, genesis included
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn tip(&self) -> &Block {
        // The sequence always holds at least the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip_hash
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn get(&self, height: usize) -> Option<&Block> {
        self.blocks.get(height)
    }

    /// Most recent block produced by proof-of-work (anything but genesis)
    pub fn last_mined_block(&self) -> Option<&Block> {
        if self.blocks.len() > 1 {
            self.blocks.last()
        } else {
            None
        }
    }

    /// Distinct identities that mined a block below `chain_height`
    pub fn miner_count(&self, chain_height: usize) -> usize {
        self.first_mined
            .values()
            .filter(|first| **first < chain_height)
            .count()
    }

    /// Whether `key` has no mined block below `chain_height`
    pub fn is_new_miner(&self, key: &MinerKey, chain_height: usize) -> bool {
        self.first_mined
            .get(key)
            .is_none_or(|first| *first >= chain_height)
    }

    /// Keys that have mined at least one block
    pub fn miners(&self) -> HashSet<MinerKey> {
        self.first_mined.keys().cloned().collect()
    }

    pub fn is_finalized(&self, tx_hash: &Hash256) -> bool {
        self.finalized.contains(tx_hash)
    }

    /// Append without validation. Only the acceptance path calls this,
    /// after the block has been checked against the current tip.
    pub(crate) fn push(&mut self, block: Block) {
        let height = self.blocks.len();
        if !block.miner.is_zero() {
            self.first_mined.entry(block.miner.clone()).or_insert(height);
        }
        for tx in &block.transactions {
            self.finalized.insert(tx.hash());
        }
        self.tip_hash = block.hash();
        self.blocks.push(block);
    }

    /// Cheap check run before every mining attempt: the tip links to its
    /// predecessor and the cached tip hash matches the stored tip.
    pub fn check_tip_link(&self) -> Result<(), IntegrityError> {
        if self.tip().hash() != self.tip_hash {
            return Err(IntegrityError::TipMismatch);
        }
        let len = self.blocks.len();
        if len > 1 && self.blocks[len - 1].previous_block_hash != self.blocks[len - 2].hash() {
            return Err(IntegrityError::BrokenLink { height: len - 1 });
        }
        Ok(())
    }

    /// Full walk of the chain
    pub fn verify_integrity(&self) -> Result<(), IntegrityError> {
        if self.blocks.first() != Some(&Block::genesis()) {
            return Err(IntegrityError::MissingGenesis);
        }
        for (height, pair) in self.blocks.windows(2).enumerate() {
            if pair[1].previous_block_hash != pair[0].hash() {
                return Err(IntegrityError::BrokenLink { height: height + 1 });
            }
        }
        self.check_tip_link()
    }
}

impl Default for ChainStore {
    fn default() -> Self {
        Self::new()
    }
}
