//! Connection management.
//!
//! A [`Connection`] is one TCP session to a peer. Each network interface keeps
//! its live connections in a [`ConnectionSet`], and every connection carries a
//! role-tagged [`ConnectionData`] that owns its replication manager.

#[allow(clippy::module_inception)]
pub mod connection;
pub mod data;
pub mod listener;
pub mod set;

pub use connection::{Connection, DEFAULT_SEND_BUFFER_LIMIT};
pub use data::ConnectionData;
pub use listener::{AllowAllListener, ConnectResult, ConnectionListener};
pub use set::ConnectionSet;

use horizon_replication::ReplicationMode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::TcpStream;

/// Identifier of a connection within one [`ConnectionSet`].
///
/// Issued by the set's own counter starting at 1; [`ConnectionId::INVALID`]
/// is never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub const INVALID: ConnectionId = ConnectionId(0);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS-level descriptor of a connection's socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub u64);

impl SocketHandle {
    #[cfg(unix)]
    pub fn of(stream: &TcpStream) -> Self {
        use std::os::fd::AsRawFd;
        Self(stream.as_raw_fd() as u64)
    }

    #[cfg(windows)]
    pub fn of(stream: &TcpStream) -> Self {
        use std::os::windows::io::AsRawSocket;
        Self(stream.as_raw_socket())
    }
}

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket:{}", self.0)
    }
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

/// Role of a connection, seen from this host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// We are a client talking to a server
    ClientToServer,
    /// We are a server talking to a client
    ServerToClient,
    /// Two servers exchanging entities
    ServerToServer,
}

impl ConnectionMode {
    /// Authority direction of the replication manager for this role.
    pub fn replication_mode(&self) -> ReplicationMode {
        match self {
            ConnectionMode::ClientToServer => ReplicationMode::LocalClientToRemoteServer,
            ConnectionMode::ServerToClient => ReplicationMode::LocalServerToRemoteClient,
            ConnectionMode::ServerToServer => ReplicationMode::LocalServerToRemoteServer,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// The connection listener refused it
    ConnectionRejected(String),
    /// The peer closed the stream
    RemoteHostClosed,
    /// The peer broke the replication authority contract
    ProtocolViolation(String),
    /// This host is shutting down
    ServerShutdown,
    /// A socket error
    TransportError(String),
    /// Closed on request of game logic
    Kicked,
}

impl DisconnectReason {
    /// Whether the peer is still there to receive final packets.
    pub fn peer_reachable(&self) -> bool {
        matches!(self, DisconnectReason::ServerShutdown | DisconnectReason::Kicked)
    }
}
