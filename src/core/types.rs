// Basic types shared by the chain, the pool and the wire protocol

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Length of a compressed secp256k1 public key
pub const MINER_KEY_LEN: usize = 33;

/// 256-bit hash type (32 bytes)
/// Used for block hashes, transaction hashes and chain links
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// Create a new Hash256 from a byte array
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Create a Hash256 from a slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| format!("Invalid hash length: expected 32, got {}", slice.len()))?;
        Ok(Self(bytes))
    }

    /// Get the hash as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Zero hash (genesis block's previous_block_hash)
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Most significant 64 bits, read big-endian.
    /// This is the value compared against the proof-of-work threshold.
    pub fn top64(&self) -> u64 {
        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        u64::from_be_bytes(head)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("Invalid hex string: {}", e))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Public key of a miner or time verifier (compressed secp256k1 encoding).
/// The genesis block carries the all-zero key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MinerKey(pub Vec<u8>);

impl MinerKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The key recorded as the miner of the genesis block
    pub fn zero() -> Self {
        Self(vec![0u8; MINER_KEY_LEN])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Short form for log lines
    pub fn short(&self) -> String {
        let hex = hex::encode(&self.0);
        hex.chars().take(12).collect()
    }
}

impl fmt::Display for MinerKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Compact ECDSA signature (64 bytes when produced by this node)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(pub Vec<u8>);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Current wall-clock time as unix nanoseconds
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Duration helper used by the codec (saturates at u64::MAX nanoseconds)
pub fn duration_to_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash256_zero() {
        let zero = Hash256::zero();
        assert_eq!(zero.as_bytes(), &[0u8; 32]);
        assert!(zero.is_zero());
        assert_eq!(zero.top64(), 0);
    }

    #[test]
    fn test_top64_is_big_endian_prefix() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x12;
        bytes[7] = 0x34;
        bytes[8] = 0xff; // beyond the top 64 bits
        let hash = Hash256::new(bytes);
        assert_eq!(hash.top64(), 0x1200_0000_0000_0034);
    }

    #[test]
    fn test_hash256_hex() {
        let hash = Hash256::new([0xab; 32]);
        let decoded = Hash256::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, decoded);
        assert!(Hash256::from_hex("abcd").is_err());
    }

    #[test]
    fn test_zero_miner_key() {
        let key = MinerKey::zero();
        assert_eq!(key.as_bytes().len(), MINER_KEY_LEN);
        assert!(key.is_zero());
        assert!(!MinerKey::new(vec![2; MINER_KEY_LEN]).is_zero());
    }
}
