// Pending-transaction pool and the transaction-status map

use crate::core::{Hash256, Transaction};
use std::collections::HashMap;

/// Mining status of a transaction, keyed by its content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxStatus {
    Unmined = 0,
    /// Part of a block this node is currently searching for
    Mining = 1,
    /// Finalized in an accepted block, ours or a peer's
    Mined = 2,
}

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Added,
    /// Already known to the pool or already finalized; nothing changed
    Ignored(TxStatus),
}

/// Working set of not-yet-finalized transactions.
///
/// Pool order carries no meaning beyond "candidates for the next block",
/// so removals swap the last entry into the vacated slot.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    pending: Vec<Transaction>,
    status: HashMap<Hash256, TxStatus>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction. Idempotent: a transaction already tracked in any
    /// status is left alone.
    pub fn submit(&mut self, tx: Transaction) -> SubmitOutcome {
        let hash = tx.hash();
        if let Some(status) = self.status.get(&hash) {
            return SubmitOutcome::Ignored(*status);
        }
        self.status.insert(hash, TxStatus::Unmined);
        self.pending.push(tx);
        SubmitOutcome::Added
    }

    /// Status of a tracked transaction. `None` once pruned, or if never seen.
    pub fn status(&self, tx_hash: &Hash256) -> Option<TxStatus> {
        self.status.get(tx_hash).copied()
    }

    /// Remove every entry whose status is `Mined`, and forget those statuses;
    /// the chain keeps the finalized set from then on. Returns how many
    /// pending entries were removed.
    pub fn prune_finalized(&mut self) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.pending.len() {
            if self.status(&self.pending[i].hash()) == Some(TxStatus::Mined) {
                self.pending.swap_remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        self.status.retain(|_, status| *status != TxStatus::Mined);
        removed
    }


    /// Flag transactions as part of the block being searched
    pub fn mark_mining(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            let status = self.status.entry(tx.hash()).or_insert(TxStatus::Unmined);
            if *status != TxStatus::Mined {
                *status = TxStatus::Mining;
            }
        }
    }

    /// Flag transactions as finalized. Also records transactions this pool
    /// never saw, so a later submission of them is ignored.
    pub fn mark_mined(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            self.status.insert(tx.hash(), TxStatus::Mined);
        }
    }

    /// Return transactions of an abandoned attempt to `Unmined`
    pub fn release(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            if let Some(status) = self.status.get_mut(&tx.hash()) {
                if *status == TxStatus::Mining {
                    *status = TxStatus::Unmined;
                }
            }
        }
    }

    /// Put back transactions of a locally mined block that lost the race
    /// at acceptance. `is_finalized` filters out those the winning chain
    /// already contains.
    pub fn reinstate<F>(&mut self, transactions: &[Transaction], is_finalized: F) -> usize
    where
        F: Fn(&Hash256) -> bool,
    {
        let mut restored = 0;
        for tx in transactions {
            let hash = tx.hash();
            if is_finalized(&hash) {
                continue;
            }
            self.status.insert(hash, TxStatus::Unmined);
            if !self.pending.iter().any(|p| p.hash() == hash) {
                self.pending.push(tx.clone());
            }
            restored += 1;
        }
        restored
    }

    /// Copy of the current candidates
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.pending.clone()
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
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
    fn test_submit_is_idempotent() {
        let mut pool = TransactionPool::new();
        assert_eq!(pool.submit(tx(1)), SubmitOutcome::Added);
        assert_eq!(pool.submit(tx(1)), SubmitOutcome::Ignored(TxStatus::Unmined));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_submit_ignores_mining_and_mined() {
        let mut pool = TransactionPool::new();
        pool.submit(tx(1));
        pool.mark_mining(&[tx(1)]);
        assert_eq!(pool.submit(tx(1)), SubmitOutcome::Ignored(TxStatus::Mining));

        pool.mark_mined(&[tx(2)]);
        assert_eq!(pool.submit(tx(2)), SubmitOutcome::Ignored(TxStatus::Mined));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_prune_removes_every_mined_entry() {
        let mut pool = TransactionPool::new();
        for n in 0..6 {
            pool.submit(tx(n));
        }
        // Adjacent and trailing entries exercise the swap-remove path
        pool.mark_mined(&[tx(0), tx(1), tx(4), tx(5)]);

        assert_eq!(pool.prune_finalized(), 4);
        assert_eq!(pool.len(), 2);
        for entry in pool.transactions() {
            assert_eq!(pool.status(&entry.hash()), Some(TxStatus::Unmined));
        }
    }

    #[test]
    fn test_prune_forgets_finalized_statuses() {
        let mut pool = TransactionPool::new();
        pool.submit(tx(1));
        pool.submit(tx(2));
        // tx(3) was never pending here, e.g. finalized by a peer's block
        pool.mark_mined(&[tx(1), tx(3)]);

        pool.prune_finalized();

        assert_eq!(pool.status(&tx(1).hash()), None);
        assert_eq!(pool.status(&tx(3).hash()), None);
        assert_eq!(pool.status(&tx(2).hash()), Some(TxStatus::Unmined));
        assert_eq!(pool.status.len(), 1);
    }

    #[test]
    fn test_status_transitions() {
        let mut pool = TransactionPool::new();
        pool.submit(tx(1));
        let hash = tx(1).hash();

        assert_eq!(pool.status(&hash), Some(TxStatus::Unmined));
        pool.mark_mining(&[tx(1)]);
        assert_eq!(pool.status(&hash), Some(TxStatus::Mining));
        pool.release(&[tx(1)]);
        assert_eq!(pool.status(&hash), Some(TxStatus::Unmined));
        pool.mark_mined(&[tx(1)]);
        pool.mark_mining(&[tx(1)]);
        assert_eq!(pool.status(&hash), Some(TxStatus::Mined));
    }

    #[test]
    fn test_reinstate_skips_finalized() {
        let mut pool = TransactionPool::new();
        pool.submit(tx(1));
        pool.submit(tx(2));
        pool.mark_mined(&[tx(1), tx(2)]);
        pool.prune_finalized();
        assert!(pool.is_empty());

        let finalized = tx(2).hash();
        let restored = pool.reinstate(&[tx(1), tx(2)], |h| *h == finalized);

        assert_eq!(restored, 1);
        assert_eq!(pool.transactions(), &[tx(1)]);
        assert_eq!(pool.status(&tx(1).hash()), Some(TxStatus::Unmined));
    }
}
