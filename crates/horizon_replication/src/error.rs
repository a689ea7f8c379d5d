//! Error types for the replication layer.
//!
//! Most replication conditions (over-subscription, late acknowledgements,
//! entities leaving a window) are folded into replicator state rather than
//! surfaced as errors. The variants here cover the genuinely exceptional
//! cases: malformed frames, codec failures and refused migrations.

use crate::types::NetEntityId;

/// Failures reported by an [`EntityStateCodec`](crate::codec::EntityStateCodec).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The codec holds no state for the entity
    #[error("Unknown entity: {0}")]
    UnknownEntity(NetEntityId),

    /// A delta could not be produced or applied
    #[error("Malformed delta: {0}")]
    Malformed(String),
}

/// Errors raised while framing or dispatching replication messages.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The byte stream does not contain a valid frame
    #[error("Frame error: {0}")]
    Frame(String),

    /// A message body failed to (de)serialize
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The state codec rejected an encode or apply
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Authority over an entity cannot be handed to the peer
    #[error("Cannot migrate {entity}: {reason}")]
    Migration {
        entity: NetEntityId,
        reason: &'static str,
    },
}
