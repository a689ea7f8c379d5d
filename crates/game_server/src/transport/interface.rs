//! Glue between the accept thread, the connection set and replication.

use super::listener::{AcceptedSocket, TransportListener};
use crate::config::{WindowKind, WindowSettings};
use crate::connection::{
    ConnectResult, Connection, ConnectionData, ConnectionId, ConnectionListener, ConnectionMode,
    ConnectionSet, ConnectionState, DisconnectReason, DEFAULT_SEND_BUFFER_LIMIT,
};
use crate::error::ServerError;
use horizon_replication::{
    EntityPositions, EntityStateCodec, NetEntityId, NullReplicationWindow, Observer,
    ProximityReplicationWindow, ReplicationSettings, ReplicationWindow, StateVersion, Vec3,
};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Builds the replication window for a newly registered connection.
pub type WindowFactory =
    Box<dyn Fn(ConnectionId, ConnectionMode) -> Box<dyn ReplicationWindow> + Send + Sync>;

/// Window factory for the configured [`WindowKind`].
///
/// Proximity windows start out observing the world origin; game logic moves
/// the observer once it knows which entity the peer controls.
pub fn window_factory_from_settings(
    settings: &WindowSettings,
    positions: Arc<EntityPositions>,
) -> WindowFactory {
    let settings = settings.clone();
    match settings.kind {
        WindowKind::Null => null_window_factory(),
        WindowKind::Proximity => Box::new(move |_: ConnectionId, _: ConnectionMode| -> Box<dyn ReplicationWindow> {
            Box::new(ProximityReplicationWindow::new(
                positions.clone(),
                Observer::Point(Vec3::zero()),
                settings.radius,
                settings.max_send_count,
                settings.update_interval_ms,
            ))
        }),
    }
}

fn null_window_factory() -> WindowFactory {
    Box::new(|_: ConnectionId, _: ConnectionMode| -> Box<dyn ReplicationWindow> {
        Box::new(NullReplicationWindow::new())
    })
}

/// One network interface: listening sockets, live connections and their
/// replication, all driven from a single tick.
pub struct NetworkInterface {
    transport: TransportListener,
    connections: ConnectionSet,
    listener: Arc<dyn ConnectionListener>,
    codec: Arc<dyn EntityStateCodec>,
    settings: ReplicationSettings,
    window_factory: WindowFactory,
    accept_mode: ConnectionMode,
    max_connections: usize,
    send_buffer_limit: usize,
    accepting: bool,
}

impl NetworkInterface {
    pub fn new(
        poll_interval: Duration,
        listener: Arc<dyn ConnectionListener>,
        codec: Arc<dyn EntityStateCodec>,
        settings: ReplicationSettings,
        max_connections: usize,
    ) -> Result<Self, ServerError> {
        Ok(Self {
            transport: TransportListener::start(poll_interval)?,
            connections: ConnectionSet::new(),
            listener,
            codec,
            settings,
            window_factory: null_window_factory(),
            accept_mode: ConnectionMode::ServerToClient,
            max_connections,
            send_buffer_limit: DEFAULT_SEND_BUFFER_LIMIT,
            accepting: true,
        })
    }

    pub fn set_window_factory(&mut self, factory: WindowFactory) {
        self.window_factory = factory;
    }

    /// Send buffer limit given to connections registered from now on.
    pub fn set_send_buffer_limit(&mut self, limit: usize) {
        self.send_buffer_limit = limit;
    }

    /// Role given to inbound connections (server-to-client unless changed).
    pub fn set_accept_mode(&mut self, mode: ConnectionMode) {
        self.accept_mode = mode;
    }

    pub fn listen(&self, address: SocketAddr) -> Result<SocketAddr, ServerError> {
        self.transport.listen(address)
    }

    pub fn stop_listening(&self, address: SocketAddr) -> bool {
        self.transport.stop_listening(address)
    }

    pub fn transport(&self) -> &TransportListener {
        &self.transport
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn connections_mut(&mut self) -> &mut ConnectionSet {
        &mut self.connections
    }

    /// Opens an outbound connection and registers it with `mode`.
    pub fn connect(
        &mut self,
        address: SocketAddr,
        mode: ConnectionMode,
        host_time_ms: u64,
    ) -> Result<ConnectionId, ServerError> {
        let stream = TcpStream::connect(address)?;
        info!("🔌 Connected to {} as {:?}", address, mode);
        self.register(stream, address, mode, host_time_ms)
    }

    fn register(
        &mut self,
        stream: TcpStream,
        remote_addr: SocketAddr,
        mode: ConnectionMode,
        host_time_ms: u64,
    ) -> Result<ConnectionId, ServerError> {
        let id = self.connections.get_next_connection_id();
        let mut connection = Connection::new(id, stream, remote_addr)?;
        connection.set_send_buffer_limit(self.send_buffer_limit);

        let mut data = ConnectionData::new(
            id,
            mode,
            self.listener.clone(),
            &self.settings,
            self.codec.clone(),
        );
        data.set_replication_window((self.window_factory)(id, mode), host_time_ms);
        connection.attach_data(data);
        connection.mark_connected();

        if !self.connections.add_connection(connection) {
            return Err(ServerError::Internal(format!("Connection {id} already registered")));
        }
        self.listener.on_connect(id, mode);
        Ok(id)
    }

    fn admit(&mut self, accepted: AcceptedSocket, host_time_ms: u64) {
        let AcceptedSocket { stream, remote_addr, local_addr, .. } = accepted;

        if !self.accepting {
            debug!("Dropping {} accepted during shutdown", remote_addr);
            refuse(&stream, remote_addr);
            return;
        }
        if self.connections.len() >= self.max_connections {
            warn!("🚫 Connection limit ({}) reached, refusing {}", self.max_connections, remote_addr);
            refuse(&stream, remote_addr);
            return;
        }
        if let ConnectResult::Reject(reason) = self.listener.validate_connect(remote_addr) {
            info!("🚫 Rejected {} on {}: {}", remote_addr, local_addr, reason);
            refuse(&stream, remote_addr);
            return;
        }

        if let Err(e) = self.register(stream, remote_addr, self.accept_mode, host_time_ms) {
            warn!("Failed to register {}: {}", remote_addr, e);
        }
    }

    /// Runs one tick: admits accepted sockets, then reads, replicates and
    /// writes every connection. Connections that failed are removed afterwards.
    pub fn update(&mut self, host_time_ms: u64) {
        for accepted in self.transport.drain_accepted() {
            self.admit(accepted, host_time_ms);
        }

        let mut closed = Vec::new();
        self.connections.visit_connections_mut(|connection| {
            if let Err(e) = connection.receive() {
                let reason = match e {
                    ServerError::ConnectionClosed => DisconnectReason::RemoteHostClosed,
                    other => DisconnectReason::TransportError(other.to_string()),
                };
                connection.close(reason, false);
            } else if let Err(e) = connection.update(host_time_ms) {
                warn!("⚠️ Connection {}: {}", connection.id(), e);
                connection.close(DisconnectReason::ProtocolViolation(e.to_string()), false);
            } else if let Err(e) = connection.flush() {
                connection.close(DisconnectReason::TransportError(e.to_string()), false);
            }

            if connection.state() == ConnectionState::Disconnected {
                closed.push(connection.id());
            }
        });

        for id in closed {
            self.remove(id);
        }
    }

    fn remove(&mut self, id: ConnectionId) {
        if let Some(connection) = self.connections.delete_connection(id) {
            let reason = connection
                .disconnect_reason()
                .cloned()
                .unwrap_or(DisconnectReason::RemoteHostClosed);
            self.listener.on_disconnect(id, &reason);
        }
    }

    /// Hands authority over `entity` to the server on connection `id`.
    ///
    /// The migration message is flushed with the connection's next update.
    pub fn migrate_entity(&mut self, id: ConnectionId, entity: NetEntityId) -> Result<StateVersion, ServerError> {
        self.connections
            .get_connection_mut(id)
            .ok_or_else(|| ServerError::Internal(format!("Unknown connection {id}")))?
            .migrate_entity(entity)
    }

    /// Closes and removes one connection. Returns false if it was unknown.
    pub fn disconnect(&mut self, id: ConnectionId, reason: DisconnectReason, flush_final_packets: bool) -> bool {
        let Some(connection) = self.connections.get_connection_mut(id) else {
            return false;
        };
        connection.close(reason, flush_final_packets);
        self.remove(id);
        true
    }

    /// Stops accepting and closes every connection with its final packets.
    ///
    /// Returns the number of connections closed.
    pub fn shutdown(&mut self) -> usize {
        self.accepting = false;
        self.transport.shutdown();

        let ids = self.connections.connection_ids();
        for id in &ids {
            self.disconnect(*id, DisconnectReason::ServerShutdown, true);
        }
        ids.len()
    }
}

fn refuse(stream: &TcpStream, remote_addr: SocketAddr) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        trace!("Refused {}: shutdown: {}", remote_addr, e);
    }
}
