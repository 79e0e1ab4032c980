// Network protocol messages

use crate::consensus::Attestation;
use crate::core::{
    Block, CodecError, MinerKey, Serializable, Signature, Transaction, read_var_bytes,
    write_var_bytes,
};
use std::io::Cursor;

/// Size of the frame header: 12-byte command plus u32 payload length
pub const HEADER_LEN: usize = 16;

/// Largest payload a peer may send in one frame
pub const MAX_PAYLOAD_LEN: usize = 32 * 1024 * 1024;

const MAX_FIELD_LEN: usize = 4096;

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Identify,
    Identity,
    VerifyTime,
    TimeVerified,
    TimeRejected,
    Tx,
    Block,
    Ack,
    Reject,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Identify => "identify",
            MessageType::Identity => "identity",
            MessageType::VerifyTime => "verifytime",
            MessageType::TimeVerified => "verified",
            MessageType::TimeRejected => "invalid",
            MessageType::Tx => "tx",
            MessageType::Block => "block",
            MessageType::Ack => "ack",
            MessageType::Reject => "reject",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "identify" => Some(MessageType::Identify),
            "identity" => Some(MessageType::Identity),
            "verifytime" => Some(MessageType::VerifyTime),
            "verified" => Some(MessageType::TimeVerified),
            "invalid" => Some(MessageType::TimeRejected),
            "tx" => Some(MessageType::Tx),
            "block" => Some(MessageType::Block),
            "ack" => Some(MessageType::Ack),
            "reject" => Some(MessageType::Reject),
            _ => None,
        }
    }
}

/// Network message. Every client call is one request and one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Ask a peer for its public key
    Identify,
    Identity(MinerKey),
    /// Ask a peer to attest a block's timestamp
    VerifyTime(Block),
    TimeVerified(Attestation),
    /// The peer finds the timestamp implausible
    TimeRejected,
    Tx(Transaction),
    Block(Block),
    Ack,
    Reject(String),
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Identify => MessageType::Identify,
            Message::Identity(_) => MessageType::Identity,
            Message::VerifyTime(_) => MessageType::VerifyTime,
            Message::TimeVerified(_) => MessageType::TimeVerified,
            Message::TimeRejected => MessageType::TimeRejected,
            Message::Tx(_) => MessageType::Tx,
            Message::Block(_) => MessageType::Block,
            Message::Ack => MessageType::Ack,
            Message::Reject(_) => MessageType::Reject,
        }
    }

    /// Serialize message to a frame
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::new();

        // Message type (12 bytes, padded with zeros)
        let msg_type = self.message_type().as_str().as_bytes();
        let mut type_bytes = [0u8; 12];
        let len = msg_type.len().min(12);
        type_bytes[..len].copy_from_slice(&msg_type[..len]);
        bytes.extend_from_slice(&type_bytes);

        let payload = self.serialize_payload();
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);

        bytes
    }

    fn serialize_payload(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        // Writes into a Vec cannot fail
        match self {
            Message::Identify | Message::TimeRejected | Message::Ack => {}
            Message::Identity(key) => {
                let _ = write_var_bytes(&mut bytes, key.as_bytes());
            }
            Message::VerifyTime(block) | Message::Block(block) => {
                bytes = Serializable::serialize(block);
            }
            Message::TimeVerified(attestation) => {
                let _ = write_var_bytes(&mut bytes, attestation.signature.as_bytes());
                let _ = write_var_bytes(&mut bytes, attestation.public_key.as_bytes());
            }
            Message::Tx(tx) => {
                bytes = Serializable::serialize(tx);
            }
            Message::Reject(reason) => {
                let _ = write_var_bytes(&mut bytes, reason.as_bytes());
            }
        }
        bytes
    }

    /// Parse a frame header into its command and payload length
    pub fn parse_header(header: &[u8; HEADER_LEN]) -> Result<(MessageType, usize), CodecError> {
        let msg_type_str = std::str::from_utf8(&header[0..12])
            .map_err(|e| CodecError::InvalidField(format!("message type: {}", e)))?
            .trim_end_matches('\0');

        let msg_type = MessageType::from_string(msg_type_str).ok_or_else(|| {
            CodecError::InvalidField(format!("unknown message type: {}", msg_type_str))
        })?;

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[12..16]);
        let payload_len = u32::from_le_bytes(len_bytes) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(CodecError::LengthOverflow(payload_len as u64));
        }

        Ok((msg_type, payload_len))
    }

    /// Deserialize a complete frame
    pub fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let header: &[u8; HEADER_LEN] = data
            .get(..HEADER_LEN)
            .and_then(|h| h.try_into().ok())
            .ok_or_else(|| CodecError::InvalidField("message too short".to_string()))?;
        let (msg_type, payload_len) = Self::parse_header(header)?;

        let payload = &data[HEADER_LEN..];
        if payload.len() != payload_len {
            return Err(CodecError::InvalidField(format!(
                "payload length {} does not match header {}",
                payload.len(),
                payload_len
            )));
        }

        Self::from_payload(msg_type, payload)
    }

    /// Decode a payload of a known type
    pub fn from_payload(msg_type: MessageType, payload: &[u8]) -> Result<Self, CodecError> {
        let message = match msg_type {
            MessageType::Identify => expect_empty(payload, Message::Identify)?,
            MessageType::TimeRejected => expect_empty(payload, Message::TimeRejected)?,
            MessageType::Ack => expect_empty(payload, Message::Ack)?,
            MessageType::Identity => {
                let fields = read_fields(payload, 1)?;
                Message::Identity(MinerKey::new(fields[0].clone()))
            }
            MessageType::VerifyTime => Message::VerifyTime(Block::deserialize(payload)?),
            MessageType::Block => Message::Block(Block::deserialize(payload)?),
            MessageType::Tx => Message::Tx(Transaction::deserialize(payload)?),
            MessageType::TimeVerified => {
                let mut fields = read_fields(payload, 2)?;
                let public_key = MinerKey::new(fields.pop().unwrap_or_default());
                let signature = Signature(fields.pop().unwrap_or_default());
                Message::TimeVerified(Attestation {
                    signature,
                    public_key,
                })
            }
            MessageType::Reject => {
                let fields = read_fields(payload, 1)?;
                let reason = String::from_utf8_lossy(&fields[0]).into_owned();
                Message::Reject(reason)
            }
        };

        Ok(message)
    }
}

fn expect_empty(payload: &[u8], message: Message) -> Result<Message, CodecError> {
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(CodecError::TrailingBytes(payload.len()))
    }
}

/// Read exactly `count` length-prefixed fields and nothing else
fn read_fields(payload: &[u8], count: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut cursor = Cursor::new(payload);
    let mut fields = Vec::with_capacity(count);
    for _ in 0..count {
        fields.push(read_var_bytes(&mut cursor, MAX_FIELD_LEN)?);
    }
    let rest = payload.len() - cursor.position() as usize;
    if rest != 0 {
        return Err(CodecError::TrailingBytes(rest));
    }
    Ok(fields)
}
