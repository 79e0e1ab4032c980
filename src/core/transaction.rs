// Transaction data structure

use crate::core::{CodecError, Hash256, MinerKey, Serializable, sha256};
use super::serialize::{read_u64, read_var_bytes, write_var_bytes};
use std::io::{Cursor, Read, Write};

/// Upper bound for an encoded public key or signature
pub(crate) const MAX_KEY_BYTES: usize = 256;

/// Value transfer between two public keys.
/// The timestamp is part of the content hash, so two otherwise identical
/// transfers created at different times are distinct transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub sender: MinerKey,
    pub recipient: MinerKey,
    /// Amount in base units
    pub amount: u64,
    /// Creation time, unix nanoseconds
    pub timestamp: u64,
}

impl Transaction {
    pub fn new(sender: MinerKey, recipient: MinerKey, amount: u64, timestamp: u64) -> Self {
        Self {
            sender,
            recipient,
            amount,
            timestamp,
        }
    }

    /// Content hash; keys the transaction-status map
    pub fn hash(&self) -> Hash256 {
        sha256(&self.serialize())
    }

    pub(crate) fn write_to<W: Write>(&self, buf: &mut W) -> std::io::Result<()> {
        write_var_bytes(buf, self.sender.as_bytes())?;
        write_var_bytes(buf, self.recipient.as_bytes())?;
        buf.write_all(&self.amount.to_le_bytes())?;
        buf.write_all(&self.timestamp.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn read_from<R: Read + ?Sized>(reader: &mut R) -> Result<Self, CodecError> {
        let sender = MinerKey::new(read_var_bytes(reader, MAX_KEY_BYTES)?);
        let recipient = MinerKey::new(read_var_bytes(reader, MAX_KEY_BYTES)?);
        let amount = read_u64(reader)?;
        let timestamp = read_u64(reader)?;
        Ok(Self {
            sender,
            recipient,
            amount,
            timestamp,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // Writing into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let tx = Self::read_from(&mut cursor)?;
        let rest = data.len() - cursor.position() as usize;
        if rest != 0 {
            return Err(CodecError::TrailingBytes(rest));
        }
        Ok(tx)
    }
}
