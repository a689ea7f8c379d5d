//! Error types and handling for the game server.
//!
//! This module defines the error types that can occur during server operations,
//! providing clear categorization of different failure modes.

use std::net::SocketAddr;

/// Enumeration of possible server errors.
///
/// Transport errors are local to one connection and recovered by closing it;
/// only [`ServerError::Bind`] at startup is meant to reach the operator.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A listening socket could not be opened
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Network-related errors on an established connection
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// The peer closed the byte stream
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// The peer sent something the replication layer refuses
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The replication layer refused an operation
    #[error("Replication error: {0}")]
    Replication(#[from] horizon_replication::ReplicationError),

    /// Internal server errors such as failing to start the accept thread
    #[error("Internal error: {0}")]
    Internal(String),
}
