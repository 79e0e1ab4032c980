// Pending-transaction snapshot using sled

use crate::core::{Serializable, Transaction};
use crate::storage::StorageError;
use sled::Db;
use std::path::Path;

/// Persisted copy of the transaction pool, keyed by transaction hash
pub struct PoolDB {
    db: Db,
}

impl PoolDB {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// Create an in-memory pool database (for testing)
    pub fn memory() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    /// Replace the stored pool with `transactions`
    pub fn replace_all(&self, transactions: &[Transaction]) -> Result<(), StorageError> {
        let mut batch = sled::Batch::default();
        for key in self.db.iter().keys() {
            batch.remove(key?);
        }
        for tx in transactions {
            batch.insert(tx.hash().as_bytes().as_slice(), tx.serialize());
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    /// Load every stored transaction
    pub fn load_all(&self) -> Result<Vec<Transaction>, StorageError> {
        let mut transactions = Vec::new();
        for entry in self.db.iter() {
            let (key, value) = entry?;
            let tx = Transaction::deserialize(&value)?;
            if tx.hash().as_bytes().as_slice() != &key[..] {
                return Err(StorageError::Corrupt(
                    "pool entry does not match its key".to_string(),
                ));
            }
            transactions.push(tx);
        }
        Ok(transactions)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MinerKey;

    fn tx(n: u64) -> Transaction {
        Transaction::new(MinerKey::new(vec![2; 33]), MinerKey::new(vec![3; 33]), n, n)
    }

    #[test]
    fn test_replace_and_load() {
        let db = PoolDB::memory().unwrap();
        assert!(db.is_empty());

        db.replace_all(&[tx(1), tx(2)]).unwrap();
        assert_eq!(db.len(), 2);

        // Replacing drops entries that are no longer pending
        db.replace_all(&[tx(2), tx(3)]).unwrap();
        let mut loaded = db.load_all().unwrap();
        loaded.sort_by_key(|t| t.amount);
        assert_eq!(loaded, vec![tx(2), tx(3)]);
    }

    #[test]
    fn test_mismatched_key_is_corrupt() {
        let db = PoolDB::memory().unwrap();
        db.db.insert([0u8; 32], tx(1).serialize()).unwrap();
        assert!(matches!(db.load_all(), Err(StorageError::Corrupt(_))));
    }
}
