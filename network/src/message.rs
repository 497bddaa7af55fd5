//! Wire message framing and the six gossip payload types.
//!
//! Every stream carries exactly one message: a 12-byte NUL-padded ASCII
//! command name, followed by a bincode-encoded payload. The payload shape
//! is specific to each command, so each payload type also knows how to
//! encode/decode itself, mirroring how the teacher's protocol layered a
//! `MessagePayload` trait over a generic `Message` envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use sole_core::{Block, Hash, Transaction};

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("message is shorter than the 12-byte command header")]
    Truncated,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("payload encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

const COMMAND_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
}

impl MessageType {
    fn command_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::Tx => "tx",
        }
    }

    fn command_bytes(&self) -> [u8; COMMAND_LEN] {
        let mut buf = [0u8; COMMAND_LEN];
        let name = self.command_str().as_bytes();
        buf[..name.len()].copy_from_slice(name);
        buf
    }

    fn from_command_bytes(bytes: &[u8]) -> Result<Self, MessageError> {
        let name = String::from_utf8_lossy(bytes).trim_end_matches('\0').to_string();
        match name.as_str() {
            "version" => Ok(MessageType::Version),
            "getblocks" => Ok(MessageType::GetBlocks),
            "inv" => Ok(MessageType::Inv),
            "getdata" => Ok(MessageType::GetData),
            "block" => Ok(MessageType::Block),
            "tx" => Ok(MessageType::Tx),
            other => Err(MessageError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command_str())
    }
}

/// An envelope carrying one command name and its raw (already bincode
/// encoded) payload bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub msg_type: MessageType,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(msg_type: MessageType, payload: Vec<u8>) -> Self {
        Message { msg_type, payload }
    }

    /// 12-byte command name followed by the raw payload; this is exactly
    /// what goes over the wire for one stream.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMMAND_LEN + self.payload.len());
        out.extend_from_slice(&self.msg_type.command_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MessageError> {
        if bytes.len() < COMMAND_LEN {
            return Err(MessageError::Truncated);
        }
        let msg_type = MessageType::from_command_bytes(&bytes[..COMMAND_LEN])?;
        Ok(Message {
            msg_type,
            payload: bytes[COMMAND_LEN..].to_vec(),
        })
    }
}

/// Shared shape for every payload: bincode encode/decode plus the command
/// it travels under.
pub trait Payload: Sized + Serialize + for<'de> Deserialize<'de> {
    const MSG_TYPE: MessageType;

    fn encode(&self) -> Result<Message, MessageError> {
        Ok(Message::new(Self::MSG_TYPE, bincode::serialize(self)?))
    }

    fn decode(message: &Message) -> Result<Self, MessageError> {
        Ok(bincode::deserialize(&message.payload)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

/// `(protoVersion, bestHeight, addrFromId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPayload {
    pub proto_version: u32,
    pub best_height: i64,
    pub from_id: String,
}

impl Payload for VersionPayload {
    const MSG_TYPE: MessageType = MessageType::Version;
}

/// `(fromId)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub from_id: String,
}

impl Payload for GetBlocksPayload {
    const MSG_TYPE: MessageType = MessageType::GetBlocks;
}

/// `(fromId, kind, items)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvPayload {
    pub from_id: String,
    pub kind: InvKind,
    pub items: Vec<Hash>,
}

impl Payload for InvPayload {
    const MSG_TYPE: MessageType = MessageType::Inv;
}

/// `(fromId, kind, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub from_id: String,
    pub kind: InvKind,
    pub id: Hash,
}

impl Payload for GetDataPayload {
    const MSG_TYPE: MessageType = MessageType::GetData;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub from_id: String,
    pub block: Block,
}

impl Payload for BlockPayload {
    const MSG_TYPE: MessageType = MessageType::Block;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub from_id: String,
    pub tx: Transaction,
}

impl Payload for TxPayload {
    const MSG_TYPE: MessageType = MessageType::Tx;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips_through_encode_decode() {
        let payload = GetBlocksPayload {
            from_id: "abc123".to_string(),
        };
        let message = payload.encode().unwrap();
        let wire = message.encode();
        let decoded_message = Message::decode(&wire).unwrap();
        assert_eq!(decoded_message.msg_type, MessageType::GetBlocks);
        let decoded = GetBlocksPayload::decode(&decoded_message).unwrap();
        assert_eq!(decoded.from_id, "abc123");
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut bytes = vec![0u8; COMMAND_LEN];
        bytes[..4].copy_from_slice(b"nope");
        assert!(matches!(Message::decode(&bytes), Err(MessageError::UnknownCommand(_))));
    }

    #[test]
    fn truncated_message_is_rejected() {
        assert!(matches!(Message::decode(&[1, 2, 3]), Err(MessageError::Truncated)));
    }
}
