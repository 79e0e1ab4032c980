// Block data structure

use crate::core::{
    CodecError, Hash256, MinerKey, Serializable, Signature, Transaction, duration_to_nanos, sha256,
};
use super::serialize::{
    read_array32, read_bytes_list, read_u64, read_var_bytes, read_varint, write_bytes_list,
    write_var_bytes, write_varint,
};
use super::transaction::MAX_KEY_BYTES;
use std::io::{Cursor, Write};
use std::time::Duration;

/// Bound on decoded list lengths (transactions, verifiers)
const MAX_LIST_LEN: usize = 100_000;

/// Block - a candidate or finalized unit of the chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Public key of the block producer
    pub miner: MinerKey,
    pub transactions: Vec<Transaction>,
    /// Varied during the proof-of-work search
    pub nonce: u64,
    pub difficulty: u64,
    /// Creation time, unix nanoseconds
    pub timestamp: u64,
    pub previous_block_hash: Hash256,
    /// Wall-clock duration of the successful search
    pub mining_time: Duration,
    /// Quorum gathered before the search, bound to the candidate contents
    pub pre_mining_time_verifiers: Vec<MinerKey>,
    pub pre_mining_time_verifier_signatures: Vec<Signature>,
    /// Quorum gathered after the search, bound to the final contents
    pub time_verifiers: Vec<MinerKey>,
    pub time_verifier_signatures: Vec<Signature>,
}

impl Block {
    /// Create an unmined candidate block with no attestations
    pub fn candidate(
        miner: MinerKey,
        transactions: Vec<Transaction>,
        difficulty: u64,
        timestamp: u64,
        previous_block_hash: Hash256,
    ) -> Self {
        Self {
            miner,
            transactions,
            nonce: 0,
            difficulty,
            timestamp,
            previous_block_hash,
            mining_time: Duration::ZERO,
            pre_mining_time_verifiers: Vec::new(),
            pre_mining_time_verifier_signatures: Vec::new(),
            time_verifiers: Vec::new(),
            time_verifier_signatures: Vec::new(),
        }
    }

    /// The fixed, zero-valued first block
    pub fn genesis() -> Self {
        Self::candidate(MinerKey::zero(), Vec::new(), 0, 0, Hash256::zero())
    }

    /// Content hash over the canonical encoding of every field.
    /// Links the next block to this one.
    pub fn hash(&self) -> Hash256 {
        sha256(&self.serialize())
    }

    /// Hash searched by proof-of-work: every field fixed before the search
    /// ends, i.e. all but `mining_time` and the post-search verifier sets,
    /// which are encoded as zero / empty.
    pub fn pow_hash(&self) -> Hash256 {
        let mut buf = Vec::new();
        let _ = self.write_to(&mut buf, Sections::Sealed);
        sha256(&buf)
    }

    /// Bytes a time verifier signs: the canonical encoding with the
    /// post-search verifier sets left empty. Pre-search attestations are
    /// requested before any verifier set is filled, so the same payload
    /// binds both rounds to the snapshot they were asked about.
    pub fn time_verification_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.write_to(&mut buf, Sections::Attested);
        buf
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.previous_block_hash.is_zero() && self.miner.is_zero() && self.difficulty == 0
    }

    fn write_to<W: Write>(&self, buf: &mut W, sections: Sections) -> std::io::Result<()> {
        write_var_bytes(buf, self.miner.as_bytes())?;
        write_varint(buf, self.transactions.len() as u64)?;
        for tx in &self.transactions {
            tx.write_to(buf)?;
        }
        buf.write_all(&self.nonce.to_le_bytes())?;
        buf.write_all(&self.difficulty.to_le_bytes())?;
        buf.write_all(&self.timestamp.to_le_bytes())?;
        buf.write_all(self.previous_block_hash.as_bytes())?;
        let mining_time = match sections {
            Sections::Sealed => 0,
            _ => duration_to_nanos(self.mining_time),
        };
        buf.write_all(&mining_time.to_le_bytes())?;
        write_bytes_list(buf, &keys_as_bytes(&self.pre_mining_time_verifiers))?;
        write_bytes_list(buf, &sigs_as_bytes(&self.pre_mining_time_verifier_signatures))?;
        if sections == Sections::Full {
            write_bytes_list(buf, &keys_as_bytes(&self.time_verifiers))?;
            write_bytes_list(buf, &sigs_as_bytes(&self.time_verifier_signatures))?;
        } else {
            write_varint(buf, 0)?;
            write_varint(buf, 0)?;
        }
        Ok(())
    }
}

/// Which parts of a block an encoding covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sections {
    Full,
    /// Everything but the post-search verifier sets
    Attested,
    /// Everything but `mining_time` and the post-search verifier sets
    Sealed,
}

fn keys_as_bytes(keys: &[MinerKey]) -> Vec<&[u8]> {
    keys.iter().map(|k| k.as_bytes()).collect()
}

fn sigs_as_bytes(sigs: &[Signature]) -> Vec<&[u8]> {
    sigs.iter().map(|s| s.as_bytes()).collect()
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf, Sections::Full);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);

        let miner = MinerKey::new(read_var_bytes(&mut cursor, MAX_KEY_BYTES)?);

        let tx_count = read_varint(&mut cursor)?;
        if tx_count > MAX_LIST_LEN as u64 {
            return Err(CodecError::LengthOverflow(tx_count));
        }
        let mut transactions = Vec::with_capacity(tx_count as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::read_from(&mut cursor)?);
        }

        let nonce = read_u64(&mut cursor)?;
        let difficulty = read_u64(&mut cursor)?;
        let timestamp = read_u64(&mut cursor)?;
        let previous_block_hash = Hash256::new(read_array32(&mut cursor)?);
        let mining_time = Duration::from_nanos(read_u64(&mut cursor)?);

        let read_keys = |cursor: &mut Cursor<&[u8]>| -> Result<Vec<MinerKey>, CodecError> {
            Ok(read_bytes_list(cursor, MAX_LIST_LEN, MAX_KEY_BYTES)?
                .into_iter()
                .map(MinerKey::new)
                .collect())
        };
        let read_sigs = |cursor: &mut Cursor<&[u8]>| -> Result<Vec<Signature>, CodecError> {
            Ok(read_bytes_list(cursor, MAX_LIST_LEN, MAX_KEY_BYTES)?
                .into_iter()
                .map(Signature)
                .collect())
        };

        let pre_mining_time_verifiers = read_keys(&mut cursor)?;
        let pre_mining_time_verifier_signatures = read_sigs(&mut cursor)?;
        let time_verifiers = read_keys(&mut cursor)?;
        let time_verifier_signatures = read_sigs(&mut cursor)?;

        let rest = data.len() - cursor.position() as usize;
        if rest != 0 {
            return Err(CodecError::TrailingBytes(rest));
        }

        Ok(Self {
            miner,
            transactions,
            nonce,
            difficulty,
            timestamp,
            previous_block_hash,
            mining_time,
            pre_mining_time_verifiers,
            pre_mining_time_verifier_signatures,
            time_verifiers,
            time_verifier_signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_block() -> Block {
        let tx = Transaction::new(MinerKey::new(vec![2; 33]), MinerKey::new(vec![3; 33]), 5, 9);
        let mut block = Block::candidate(
            MinerKey::new(vec![4; 33]),
            vec![tx],
            50_000,
            1_700_000_000_000_000_000,
            Hash256::new([7; 32]),
        );
        block.pre_mining_time_verifiers = vec![MinerKey::new(vec![5; 33])];
        block.pre_mining_time_verifier_signatures = vec![Signature(vec![6; 64])];
        block
    }

    #[test]
    fn test_block_encoding() {
        let mut block = sample_block();
        block.time_verifiers = vec![MinerKey::new(vec![8; 33])];
        block.time_verifier_signatures = vec![Signature(vec![9; 64])];
        block.mining_time = Duration::from_millis(1500);

        let decoded = Block::deserialize(&block.serialize()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn test_hash_covers_every_field() {
        let block = sample_block();
        let base = block.hash();

        let mut changed = block.clone();
        changed.nonce += 1;
        assert_ne!(changed.hash(), base);

        let mut changed = block.clone();
        changed.timestamp += 1;
        assert_ne!(changed.hash(), base);

        let mut changed = block.clone();
        changed.time_verifiers.push(MinerKey::new(vec![1; 33]));
        assert_ne!(changed.hash(), base);

        let mut changed = block.clone();
        changed.pre_mining_time_verifier_signatures.clear();
        assert_ne!(changed.hash(), base);

        assert_eq!(block.hash(), base);
    }

    #[test]
    fn test_time_verification_payload_ignores_post_search_sets() {
        let block = sample_block();
        let mut attested = block.clone();
        attested.time_verifiers = vec![MinerKey::new(vec![8; 33])];
        attested.time_verifier_signatures = vec![Signature(vec![9; 64])];

        assert_eq!(
            block.time_verification_payload(),
            attested.time_verification_payload()
        );
        assert_eq!(block.time_verification_payload(), block.serialize());
    }

    #[test]
    fn test_pow_hash_ignores_post_search_fields() {
        let block = sample_block();
        let mut finished = block.clone();
        finished.mining_time = Duration::from_secs(42);
        finished.time_verifiers = vec![MinerKey::new(vec![8; 33])];
        finished.time_verifier_signatures = vec![Signature(vec![9; 64])];

        assert_eq!(block.pow_hash(), finished.pow_hash());
        assert_ne!(block.hash(), finished.hash());

        let mut renonced = block.clone();
        renonced.nonce += 1;
        assert_ne!(block.pow_hash(), renonced.pow_hash());
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();
        assert!(genesis.is_genesis());
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.difficulty, 0);
        assert_eq!(genesis.timestamp, 0);
        assert_eq!(genesis.hash(), Block::genesis().hash());
    }

    #[test]
    fn test_truncated_block_rejected() {
        let bytes = sample_block().serialize();
        assert!(Block::deserialize(&bytes[..bytes.len() - 3]).is_err());
    }
}
