//! # Game Server - Replication Host
//!
//! The networking half of Horizon: accepts TCP connections, keeps them in a
//! dual-indexed connection set, and replicates authoritative entity state to
//! each peer through its own [`EntityReplicationManager`](horizon_replication::EntityReplicationManager).
//!
//! ## Architecture Overview
//!
//! * **Transport listener** - A background `horizon-accept` thread polls the
//!   listening sockets and hands accepted streams to the tick over a channel
//! * **Connection set** - Live connections indexed by id and by socket
//! * **Connection data** - Role-tagged replication state owned by each connection
//! * **Game server** - Tokio interval tick that drives all of the above
//!
//! ### Tick Flow
//!
//! 1. Accepted sockets are authorized by the [`ConnectionListener`] and registered
//! 2. Each connection reads its socket and applies inbound frames
//! 3. Replication admits deferred entities, refreshes the window and queues updates
//! 4. Each connection flushes its send buffer
//! 5. Connections that failed are removed and reported to the listener
//!
//! Game logic never touches sockets; it mutates the shared
//! [`PropertyStateCodec`](horizon_replication::PropertyStateCodec) and
//! [`EntityPositions`](horizon_replication::EntityPositions).
//!
//! ## Error Handling
//!
//! The server uses structured error types ([`ServerError`]) to categorize failures.
//! Only a failure to bind reaches the caller of [`GameServer::start`]; errors on
//! an established connection close that connection alone.

pub use config::{ServerConfig, WindowKind, WindowSettings};
pub use connection::{
    AllowAllListener, ConnectResult, Connection, ConnectionData, ConnectionId, ConnectionListener,
    ConnectionMode, ConnectionSet, ConnectionState, DisconnectReason, SocketHandle,
    DEFAULT_SEND_BUFFER_LIMIT,
};
pub use error::ServerError;
pub use server::GameServer;
pub use shutdown::ShutdownState;
pub use transport::{NetworkInterface, TransportListener};
pub use utils::{create_server, create_server_with_config};

pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod utils;
