//! Replication wire messages and stream framing.
//!
//! Every message is a serde_json body prefixed with its big-endian `u32`
//! length. Opaque codec payloads travel as base64 strings inside the JSON.

use crate::error::ReplicationError;
use crate::types::{NetEntityId, NetEntityRole, StateVersion};
use serde::{Deserialize, Serialize};

/// Largest frame body accepted from a peer.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

const FRAME_HEADER_LEN: usize = 4;

/// A remote procedure call targeting one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRpcMessage {
    pub entity: NetEntityId,
    pub rpc_name: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
}

impl EntityRpcMessage {
    pub fn new(entity: NetEntityId, rpc_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            entity,
            rpc_name: rpc_name.into(),
            payload,
        }
    }
}

/// Messages exchanged between two replication managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplicationMessage {
    /// First message for an entity; carries the full state
    EntityCreate {
        entity: NetEntityId,
        role: NetEntityRole,
        version: StateVersion,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Delta since the previous message for the entity
    EntityUpdate {
        entity: NetEntityId,
        version: StateVersion,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// The entity is no longer replicated to the receiver
    EntityRemove { entity: NetEntityId },
    /// The receiver has applied state up to `version`
    EntityAck {
        entity: NetEntityId,
        version: StateVersion,
    },
    EntityRpc(EntityRpcMessage),
    /// Authority over the entity moves to the receiver, with its full state
    EntityMigration {
        entity: NetEntityId,
        version: StateVersion,
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
}

impl ReplicationMessage {
    /// Entity the message refers to.
    pub fn entity(&self) -> NetEntityId {
        match self {
            ReplicationMessage::EntityCreate { entity, .. }
            | ReplicationMessage::EntityUpdate { entity, .. }
            | ReplicationMessage::EntityRemove { entity }
            | ReplicationMessage::EntityAck { entity, .. }
            | ReplicationMessage::EntityMigration { entity, .. } => *entity,
            ReplicationMessage::EntityRpc(rpc) => rpc.entity,
        }
    }

    /// Short name of the message type, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ReplicationMessage::EntityCreate { .. } => "create",
            ReplicationMessage::EntityUpdate { .. } => "update",
            ReplicationMessage::EntityRemove { .. } => "remove",
            ReplicationMessage::EntityAck { .. } => "ack",
            ReplicationMessage::EntityRpc(_) => "rpc",
            ReplicationMessage::EntityMigration { .. } => "migration",
        }
    }
}

/// Appends one framed message to `out` and returns the bytes written.
pub fn encode_frame(message: &ReplicationMessage, out: &mut Vec<u8>) -> Result<usize, ReplicationError> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ReplicationError::Frame(format!(
            "frame of {} bytes exceeds limit of {MAX_FRAME_SIZE}",
            body.len()
        )));
    }

    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(FRAME_HEADER_LEN + body.len())
}

/// Decodes every complete frame at the front of `buffer`.
///
/// Consumed bytes are drained; a trailing partial frame stays in the buffer
/// until more bytes arrive.
pub fn decode_frames(buffer: &mut Vec<u8>) -> Result<Vec<ReplicationMessage>, ReplicationError> {
    let mut messages = Vec::new();
    let mut offset = 0;

    while buffer.len() - offset >= FRAME_HEADER_LEN {
        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&buffer[offset..offset + FRAME_HEADER_LEN]);
        let body_len = u32::from_be_bytes(header) as usize;

        if body_len > MAX_FRAME_SIZE {
            return Err(ReplicationError::Frame(format!(
                "peer announced frame of {body_len} bytes, limit is {MAX_FRAME_SIZE}"
            )));
        }

        let body_start = offset + FRAME_HEADER_LEN;
        if buffer.len() - body_start < body_len {
            break;
        }

        messages.push(serde_json::from_slice(&buffer[body_start..body_start + body_len])?);
        offset = body_start + body_len;
    }

    buffer.drain(..offset);
    Ok(messages)
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
