//! Server configuration types and defaults.
//!
//! This module contains the server configuration structure and default values
//! used to initialize and customize the game server behavior.

use crate::connection::DEFAULT_SEND_BUFFER_LIMIT;
use horizon_replication::ReplicationSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Configuration structure for the game server.
///
/// Contains all necessary parameters to configure server behavior including
/// network settings, connection limits, and replication tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Server tick interval in milliseconds
    pub tick_interval_ms: u64,

    /// How long the accept thread sleeps between polls of its listen sockets
    pub accept_poll_interval_ms: u64,

    /// Unsent bytes per connection above which its replication is paused
    pub max_send_buffer_bytes: usize,

    /// Admission cap, removal grace and orphaned RPC timeout
    pub replication: ReplicationSettings,

    /// Replication window attached to each accepted connection
    pub window: WindowSettings,
}

/// Which interest-management policy new connections receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Replicate nothing
    Null,
    /// Replicate everything within a radius of the connection's observer
    Proximity,
}

/// Replication window settings for accepted connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub kind: WindowKind,
    /// Relevance radius for proximity windows
    pub radius: f64,
    /// Replicators serviced per tick
    pub max_send_count: usize,
    /// Minimum time between window recomputations
    pub update_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            tick_interval_ms: 50, // 20 ticks per second by default
            accept_poll_interval_ms: 10,
            max_send_buffer_bytes: DEFAULT_SEND_BUFFER_LIMIT,
            replication: ReplicationSettings::default(),
            window: WindowSettings::default(),
        }
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            kind: WindowKind::Proximity,
            radius: 500.0,
            max_send_count: 64,
            update_interval_ms: 100,
        }
    }
}
