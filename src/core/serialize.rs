// Canonical byte encoding used for hashing, signing and the peer wire

use std::io::{self, Read, Write};

/// Malformed canonical encoding
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input: {0}")]
    Truncated(#[from] io::Error),
    #[error("length prefix {0} exceeds remaining input")]
    LengthOverflow(u64),
    #[error("{0} trailing bytes after value")]
    TrailingBytes(usize),
    #[error("invalid field: {0}")]
    InvalidField(String),
}

/// Trait for types with a canonical binary encoding
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, CodecError>
    where
        Self: Sized;
}

/// Write a variable-length integer (VarInt)
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix.
/// `limit` bounds the allocation so a hostile length prefix cannot exhaust memory.
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R, limit: usize) -> Result<Vec<u8>, CodecError> {
    let len = read_varint(reader)?;
    if len > limit as u64 {
        return Err(CodecError::LengthOverflow(len));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> Result<u64, CodecError> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_array32<R: Read + ?Sized>(reader: &mut R) -> Result<[u8; 32], CodecError> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Read a length-prefixed list of length-prefixed byte strings
pub fn read_bytes_list<R: Read + ?Sized>(
    reader: &mut R,
    max_items: usize,
    max_item_len: usize,
) -> Result<Vec<Vec<u8>>, CodecError> {
    let count = read_varint(reader)?;
    if count > max_items as u64 {
        return Err(CodecError::LengthOverflow(count));
    }
    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        items.push(read_var_bytes(reader, max_item_len)?);
    }
    Ok(items)
}

pub fn write_bytes_list<W: Write, T: AsRef<[u8]>>(writer: &mut W, items: &[T]) -> io::Result<()> {
    write_varint(writer, items.len() as u64)?;
    for item in items {
        write_var_bytes(writer, item.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_varint_small() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 100).unwrap();
        assert_eq!(buf, vec![100]);

        let mut cursor = Cursor::new(buf);
        let value = read_varint(&mut cursor).unwrap();
        assert_eq!(value, 100);
    }

    #[test]
    fn test_varint_widths() {
        for (value, len) in [(1000u64, 3usize), (100_000, 5), (u64::MAX, 9)] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value).unwrap();
            assert_eq!(buf.len(), len);
            assert_eq!(read_varint(&mut Cursor::new(buf)).unwrap(), value);
        }
    }

    #[test]
    fn test_var_bytes_limit() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, &[7u8; 40]).unwrap();

        assert!(read_var_bytes(&mut Cursor::new(buf.clone()), 64).is_ok());
        assert!(matches!(
            read_var_bytes(&mut Cursor::new(buf), 16),
            Err(CodecError::LengthOverflow(40))
        ));
    }

    #[test]
    fn test_truncated_input() {
        let mut buf = Vec::new();
        write_var_bytes(&mut buf, b"hello world").unwrap();
        buf.truncate(4);
        assert!(matches!(
            read_var_bytes(&mut Cursor::new(buf), 64),
            Err(CodecError::Truncated(_))
        ));
    }
}
