// Blockchain database using sled

use crate::core::{Block, Hash256, Serializable};
use crate::storage::StorageError;
use sled::Db;
use std::path::Path;

/// Blockchain database: blocks by hash plus a height index
pub struct BlockchainDB {
    db: Db,
}

impl BlockchainDB {
    /// Create a new blockchain database
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing)
    pub fn memory() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Store a block at `height`, indexed by its hash
    pub fn store_block(&self, height: u64, block: &Block) -> Result<(), StorageError> {
        let hash = block.hash();
        self.db.insert(Self::block_key(&hash), block.serialize())?;
        self.db.insert(Self::height_key(height), hash.as_bytes().as_slice())?;
        Ok(())
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StorageError> {
        match self.db.get(Self::block_key(hash))? {
            Some(data) => Ok(Some(Block::deserialize(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block hash by height
    pub fn get_hash_by_height(&self, height: u64) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(Self::height_key(height))? {
            Some(data) => Ok(Some(read_hash(&data)?)),
            None => Ok(None),
        }
    }

    /// Get block by height
    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.get_hash_by_height(height)? {
            Some(hash) => self.get_block(&hash),
            None => Ok(None),
        }
    }

    /// Every stored block in height order. A gap in the index is corruption.
    pub fn load_blocks(&self) -> Result<Vec<Block>, StorageError> {
        let height = self.get_chain_height()?;
        let mut blocks = Vec::with_capacity(height as usize);
        for h in 0..height {
            let block = self
                .get_block_by_height(h)?
                .ok_or_else(|| StorageError::Corrupt(format!("missing block at height {}", h)))?;
            blocks.push(block);
        }
        Ok(blocks)
    }

    /// Store the chain tip (best block hash)
    pub fn store_tip(&self, hash: &Hash256) -> Result<(), StorageError> {
        self.db.insert(b"tip", hash.as_bytes().as_slice())?;
        Ok(())
    }

    /// Get the chain tip (best block hash)
    pub fn get_tip(&self) -> Result<Option<Hash256>, StorageError> {
        match self.db.get(b"tip")? {
            Some(data) => Ok(Some(read_hash(&data)?)),
            None => Ok(None),
        }
    }

    /// Store the number of blocks, genesis included
    pub fn store_chain_height(&self, height: u64) -> Result<(), StorageError> {
        self.db.insert(b"height", height.to_le_bytes().to_vec())?;
        Ok(())
    }

    /// Get the number of stored blocks (0 for an empty database)
    pub fn get_chain_height(&self) -> Result<u64, StorageError> {
        match self.db.get(b"height")? {
            Some(data) => {
                let bytes: [u8; 8] = data[..].try_into().map_err(|_| {
                    StorageError::Corrupt(format!("invalid height data length: {}", data.len()))
                })?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }

    /// Drop every block and index entry
    pub fn clear(&self) -> Result<(), StorageError> {
        self.db.clear()?;
        Ok(())
    }

    /// Manually flush database (call after batch operations)
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    // Helper: create key for block storage
    fn block_key(hash: &Hash256) -> Vec<u8> {
        let mut key = Vec::with_capacity(33);
        key.push(b'b'); // 'b' for block
        key.extend_from_slice(hash.as_bytes());
        key
    }

    // Helper: create key for height index (big-endian so keys sort by height)
    fn height_key(height: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(9);
        key.push(b'h'); // 'h' for height
        key.extend_from_slice(&height.to_be_bytes());
        key
    }
}

fn read_hash(data: &[u8]) -> Result<Hash256, StorageError> {
    Hash256::from_slice(data).map_err(StorageError::Corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MinerKey, Transaction};

    fn child_of(parent: &Block) -> Block {
        let tx = Transaction::new(MinerKey::new(vec![2; 33]), MinerKey::new(vec![3; 33]), 1, 1);
        Block::candidate(MinerKey::new(vec![4; 33]), vec![tx], 1, 1, parent.hash())
    }

    #[test]
    fn test_store_and_get_block() {
        let db = BlockchainDB::memory().unwrap();
        let block = Block::genesis();

        db.store_block(0, &block).unwrap();

        let retrieved = db.get_block(&block.hash()).unwrap().unwrap();
        assert_eq!(block, retrieved);
        assert!(db.get_block(&Hash256::new([1; 32])).unwrap().is_none());
    }

    #[test]
    fn test_height_index() {
        let db = BlockchainDB::memory().unwrap();
        let genesis = Block::genesis();
        let child = child_of(&genesis);

        db.store_block(0, &genesis).unwrap();
        db.store_block(1, &child).unwrap();

        assert_eq!(db.get_hash_by_height(1).unwrap(), Some(child.hash()));
        assert_eq!(db.get_block_by_height(0).unwrap(), Some(genesis));
        assert!(db.get_block_by_height(2).unwrap().is_none());
    }

    #[test]
    fn test_load_blocks_in_order() {
        let db = BlockchainDB::memory().unwrap();
        let genesis = Block::genesis();
        let child = child_of(&genesis);

        db.store_block(0, &genesis).unwrap();
        db.store_block(1, &child).unwrap();
        db.store_chain_height(2).unwrap();
        assert_eq!(db.load_blocks().unwrap(), vec![genesis, child]);

        // Height claims a block that is not there
        db.store_chain_height(3).unwrap();
        assert!(matches!(db.load_blocks(), Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_tip_and_height() {
        let db = BlockchainDB::memory().unwrap();
        let hash = Block::genesis().hash();

        assert_eq!(db.get_chain_height().unwrap(), 0);
        assert!(db.get_tip().unwrap().is_none());

        db.store_tip(&hash).unwrap();
        db.store_chain_height(10).unwrap();
        assert_eq!(db.get_tip().unwrap(), Some(hash));
        assert_eq!(db.get_chain_height().unwrap(), 10);
    }
}
