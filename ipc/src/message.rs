//! Message envelope and payload representation

use core_types::{QuantumId, RegionId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Largest payload carried inline with a message, in bytes
///
/// Payloads above this size are staged in a shared region and the
/// message carries only a handle to it.
pub const INLINE_PAYLOAD_MAX: usize = 256;

/// Unique identifier for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new unique message ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID value
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

/// Where a message's bytes live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Bytes copied into the message itself
    Inline(Vec<u8>),
    /// Bytes staged in a region mapped into the receiver's address space
    Shared { region: RegionId, len: u64 },
}

impl Payload {
    /// Payload length in bytes
    pub fn len(&self) -> u64 {
        match self {
            Payload::Inline(bytes) => bytes.len() as u64,
            Payload::Shared { len, .. } => *len,
        }
    }

    /// Returns whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Errors from payload encoding and decoding
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("payload serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("payload bytes live in region {0}; read them through the memory manager")]
    SharedPayload(RegionId),
}

/// A message in flight on a conduit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: QuantumId,
    /// Application-defined discriminant, opaque to the kernel
    pub tag: u32,
    pub payload: Payload,
}

impl Message {
    /// Creates a message with an inline payload
    pub fn inline(sender: QuantumId, tag: u32, bytes: Vec<u8>) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            tag,
            payload: Payload::Inline(bytes),
        }
    }

    /// Creates a message whose payload lives in a shared region
    pub fn shared(sender: QuantumId, tag: u32, region: RegionId, len: u64) -> Self {
        Self {
            id: MessageId::new(),
            sender,
            tag,
            payload: Payload::Shared { region, len },
        }
    }

    /// Encodes a serializable value into an inline message
    pub fn encode<T: Serialize>(sender: QuantumId, tag: u32, value: &T) -> Result<Self, PayloadError> {
        let bytes = serde_json::to_vec(value)?;
        Ok(Self::inline(sender, tag, bytes))
    }

    /// Decodes an inline payload back into a typed value
    ///
    /// Shared payloads cannot be decoded here; the caller must read the
    /// region contents first.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        match &self.payload {
            Payload::Inline(bytes) => Ok(serde_json::from_slice(bytes)?),
            Payload::Shared { region, .. } => Err(PayloadError::SharedPayload(*region)),
        }
    }

    /// Returns the inline bytes, if the payload is inline
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Inline(bytes) => Some(bytes),
            Payload::Shared { .. } => None,
        }
    }

    /// Returns whether the payload travels by shared region
    pub fn is_shared(&self) -> bool {
        matches!(self.payload, Payload::Shared { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        label: String,
        value: u32,
    }

    #[test]
    fn test_inline_round_trip() {
        let sender = QuantumId::new();
        let probe = Probe {
            label: "ping".into(),
            value: 7,
        };
        let msg = Message::encode(sender, 1, &probe).unwrap();
        assert!(!msg.is_shared());
        let back: Probe = msg.decode().unwrap();
        assert_eq!(back, probe);
    }

    #[test]
    fn test_shared_payload_refuses_decode() {
        let region = RegionId::new();
        let msg = Message::shared(QuantumId::new(), 2, region, 8192);
        assert!(msg.is_shared());
        assert_eq!(msg.payload.len(), 8192);
        let err = msg.decode::<Probe>().unwrap_err();
        assert!(matches!(err, PayloadError::SharedPayload(r) if r == region));
    }

    #[test]
    fn test_inline_bytes_accessor() {
        let msg = Message::inline(QuantumId::new(), 3, b"PING".to_vec());
        assert_eq!(msg.inline_bytes(), Some(b"PING".as_slice()));
        assert_eq!(msg.payload.len(), 4);
    }

    #[test]
    fn test_message_ids_unique() {
        let a = Message::inline(QuantumId::new(), 0, vec![]);
        let b = Message::inline(QuantumId::new(), 0, vec![]);
        assert_ne!(a.id, b.id);
    }
}
