//! Connection authorization hook.

use super::{ConnectionId, ConnectionMode, DisconnectReason};
use std::net::SocketAddr;
use tracing::info;

/// Verdict of [`ConnectionListener::validate_connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectResult {
    Accept,
    Reject(String),
}

/// Callbacks for inbound connection accept/reject and disconnect notification.
///
/// Invoked from the simulation tick, never from the accept thread.
pub trait ConnectionListener: Send + Sync {
    /// Decides whether a freshly accepted socket becomes a connection.
    fn validate_connect(&self, remote_addr: SocketAddr) -> ConnectResult;

    /// A connection was registered and its replication data attached.
    fn on_connect(&self, connection_id: ConnectionId, mode: ConnectionMode);

    /// A connection was closed and removed from its set.
    fn on_disconnect(&self, connection_id: ConnectionId, reason: &DisconnectReason);
}

/// Accepts everyone and logs lifecycle events.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAllListener;

impl ConnectionListener for AllowAllListener {
    fn validate_connect(&self, _remote_addr: SocketAddr) -> ConnectResult {
        ConnectResult::Accept
    }

    fn on_connect(&self, connection_id: ConnectionId, mode: ConnectionMode) {
        info!("🔗 Connection {} established ({:?})", connection_id, mode);
    }

    fn on_disconnect(&self, connection_id: ConnectionId, reason: &DisconnectReason) {
        info!("❌ Connection {} disconnected: {:?}", connection_id, reason);
    }
}
