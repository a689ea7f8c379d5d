//! A single TCP session to a peer.

use super::{ConnectionData, ConnectionId, ConnectionState, DisconnectReason, SocketHandle};
use crate::error::ServerError;
use horizon_replication::{NetEntityId, StateVersion};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use tracing::{debug, trace};

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Send buffer size above which replication is paused for a connection.
pub const DEFAULT_SEND_BUFFER_LIMIT: usize = 2 * 1024 * 1024;

/// One bidirectional byte-stream session.
///
/// The stream is non-blocking. Replication only ever appends to the send
/// buffer; [`flush`](Self::flush) moves bytes to the socket once per tick.
/// While the send buffer holds more than its limit the peer is not keeping
/// up and replication ticks are skipped until it drains.
pub struct Connection {
    id: ConnectionId,
    socket: SocketHandle,
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: ConnectionState,
    recv_buffer: Vec<u8>,
    send_buffer: Vec<u8>,
    send_buffer_limit: usize,
    data: Option<ConnectionData>,
    disconnect_reason: Option<DisconnectReason>,
}

impl Connection {
    pub fn new(id: ConnectionId, stream: TcpStream, remote_addr: SocketAddr) -> Result<Self, ServerError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            id,
            socket: SocketHandle::of(&stream),
            stream,
            remote_addr,
            state: ConnectionState::Connecting,
            recv_buffer: Vec::new(),
            send_buffer: Vec::new(),
            send_buffer_limit: DEFAULT_SEND_BUFFER_LIMIT,
            data: None,
            disconnect_reason: None,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn socket(&self) -> SocketHandle {
        self.socket
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, ConnectionState::Connecting | ConnectionState::Connected)
    }

    pub fn disconnect_reason(&self) -> Option<&DisconnectReason> {
        self.disconnect_reason.as_ref()
    }

    pub fn mark_connected(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Connected;
        }
    }

    pub fn attach_data(&mut self, data: ConnectionData) {
        self.data = Some(data);
    }

    pub fn data(&self) -> Option<&ConnectionData> {
        self.data.as_ref()
    }

    pub fn data_mut(&mut self) -> Option<&mut ConnectionData> {
        self.data.as_mut()
    }

    /// Appends raw bytes to the send buffer.
    pub fn queue_bytes(&mut self, bytes: &[u8]) {
        self.send_buffer.extend_from_slice(bytes);
    }

    pub fn send_buffer(&self) -> &[u8] {
        &self.send_buffer
    }

    pub fn set_send_buffer_limit(&mut self, limit: usize) {
        self.send_buffer_limit = limit;
    }

    /// Whether unsent bytes have reached the send buffer limit.
    pub fn is_backpressured(&self) -> bool {
        self.send_buffer.len() >= self.send_buffer_limit
    }

    pub fn pending_receive_bytes(&self) -> usize {
        self.recv_buffer.len()
    }

    /// Reads everything the socket has ready.
    ///
    /// A zero-length read means the peer closed the stream; the connection
    /// moves to `Disconnecting` and [`ServerError::ConnectionClosed`] is returned.
    pub fn receive(&mut self) -> Result<usize, ServerError> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut total = 0;

        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.state = ConnectionState::Disconnecting;
                    return Err(ServerError::ConnectionClosed);
                }
                Ok(read) => {
                    self.recv_buffer.extend_from_slice(&chunk[..read]);
                    total += read;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total > 0 {
            trace!("📥 Connection {} received {} bytes", self.id, total);
        }
        Ok(total)
    }

    /// Writes as much of the send buffer as the socket accepts.
    pub fn flush(&mut self) -> Result<usize, ServerError> {
        let mut written = 0;

        while written < self.send_buffer.len() {
            match self.stream.write(&self.send_buffer[written..]) {
                Ok(0) => break,
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.send_buffer.drain(..written);
                    return Err(e.into());
                }
            }
        }

        self.send_buffer.drain(..written);
        Ok(written)
    }

    /// Runs the attached replication data for one tick.
    ///
    /// Consumes received frames, then queues this tick's outgoing messages.
    /// Outgoing replication is skipped while the connection is backpressured;
    /// deltas are taken from the last sent version, so pending changes
    /// coalesce into the next tick that runs. Performs no socket I/O.
    pub fn update(&mut self, host_time_ms: u64) -> Result<(), ServerError> {
        if !self.is_open() {
            return Ok(());
        }
        let Some(data) = self.data.as_mut() else {
            return Ok(());
        };

        data.handle_incoming(&mut self.recv_buffer, host_time_ms, &mut self.send_buffer)?;
        if self.send_buffer.len() >= self.send_buffer_limit {
            trace!(
                "⏸️ Connection {}: {} bytes unsent, skipping replication",
                self.id,
                self.send_buffer.len()
            );
            return Ok(());
        }
        data.update(host_time_ms, &mut self.send_buffer);
        Ok(())
    }

    /// Hands authority over `entity` to the peer; see
    /// [`EntityReplicationManager::migrate_entity`](horizon_replication::EntityReplicationManager::migrate_entity).
    pub fn migrate_entity(&mut self, entity: NetEntityId) -> Result<StateVersion, ServerError> {
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| ServerError::Internal(format!("Connection {} has no replication data", self.id)))?;
        Ok(data
            .replication_manager_mut()
            .migrate_entity(entity, &mut self.send_buffer)?)
    }

    /// Closes the connection.
    ///
    /// With `flush_final_packets` the replication manager writes its removal
    /// notices and one non-blocking flush is attempted; otherwise replicator
    /// work is abandoned immediately.
    pub fn close(&mut self, reason: DisconnectReason, flush_final_packets: bool) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnecting;

        if let Some(mut data) = self.data.take() {
            if flush_final_packets {
                let removals = data.close_gracefully(&mut self.send_buffer);
                if let Err(e) = self.flush() {
                    debug!("Connection {}: final flush failed: {}", self.id, e);
                }
                trace!("Connection {}: sent {} final removal(s)", self.id, removals);
            }
        }

        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            trace!("Connection {}: shutdown: {}", self.id, e);
        }
        self.state = ConnectionState::Disconnected;
        self.disconnect_reason = Some(reason);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("socket", &self.socket)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state)
            .field("mode", &self.data.as_ref().map(ConnectionData::mode))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{AllowAllListener, ConnectionMode};
    use horizon_replication::{
        EntityPositions, Observer, PropertyStateCodec, ProximityReplicationWindow,
        ReplicationSettings, Vec3,
    };
    use serde_json::json;
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, addr) = listener.accept().unwrap();
        (server, client, addr)
    }

    /// A connected server-side connection replicating `entity` from `codec`.
    fn replicating(stream: TcpStream, addr: SocketAddr, codec: Arc<PropertyStateCodec>, entity: NetEntityId) -> Connection {
        let positions = Arc::new(EntityPositions::new());
        positions.set_position(entity, Vec3::zero());

        let mut data = ConnectionData::new(
            ConnectionId(1),
            ConnectionMode::ServerToClient,
            Arc::new(AllowAllListener),
            &ReplicationSettings::default(),
            codec,
        );
        data.set_replication_window(
            Box::new(ProximityReplicationWindow::new(positions, Observer::Point(Vec3::zero()), 10.0, 16, 0)),
            0,
        );

        let mut connection = Connection::new(ConnectionId(1), stream, addr).unwrap();
        connection.attach_data(data);
        connection.mark_connected();
        connection
    }

    fn create_sent(connection: &Connection, entity: NetEntityId) -> bool {
        connection
            .data()
            .and_then(|data| data.replication_manager().replicator(entity))
            .is_some_and(|rep| rep.create_sent())
    }

    #[test]
    fn test_full_send_buffer_pauses_replication() {
        let (server, _client, addr) = pair();
        let codec = Arc::new(PropertyStateCodec::new());
        let entity = NetEntityId::new(1);
        codec.set_property(entity, "hp", json!(3));

        let mut connection = replicating(server, addr, codec, entity);
        connection.set_send_buffer_limit(1024);
        connection.queue_bytes(&[0u8; 1024]);
        assert!(connection.is_backpressured());

        connection.update(10).unwrap();
        assert_eq!(connection.send_buffer().len(), 1024);
        assert!(!create_sent(&connection, entity));

        connection.flush().unwrap();
        assert!(!connection.is_backpressured());
        connection.update(20).unwrap();
        assert!(create_sent(&connection, entity));
    }

    #[test]
    fn test_send_buffer_stays_bounded_when_peer_never_reads() {
        const LIMIT: usize = 256 * 1024;
        let (server, _client, addr) = pair();
        let codec = Arc::new(PropertyStateCodec::new());
        let entity = NetEntityId::new(1);
        codec.set_property(entity, "blob", json!(""));

        let mut connection = replicating(server, addr, codec.clone(), entity);
        connection.set_send_buffer_limit(LIMIT);

        let filler = "x".repeat(64 * 1024);
        for tick in 0..400u64 {
            codec.set_property(entity, "blob", json!(format!("{tick}{filler}")));
            connection.update(tick).unwrap();
            assert!(connection.send_buffer().len() < LIMIT + 128 * 1024);
            connection.flush().unwrap();
        }
    }

    #[test]
    fn test_receive_and_flush() {
        let (server, mut client, addr) = pair();
        let mut connection = Connection::new(ConnectionId(1), server, addr).unwrap();
        assert_eq!(connection.state(), ConnectionState::Connecting);
        connection.mark_connected();

        client.write_all(b"hello").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while connection.pending_receive_bytes() < 5 && Instant::now() < deadline {
            connection.receive().unwrap();
        }
        assert_eq!(connection.pending_receive_bytes(), 5);

        connection.queue_bytes(b"world");
        assert_eq!(connection.flush().unwrap(), 5);
        assert!(connection.send_buffer().is_empty());

        let mut reply = [0u8; 5];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"world");
    }

    #[test]
    fn test_peer_close_is_detected() {
        let (server, client, addr) = pair();
        let mut connection = Connection::new(ConnectionId(1), server, addr).unwrap();
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut closed = false;
        while Instant::now() < deadline {
            if let Err(ServerError::ConnectionClosed) = connection.receive() {
                closed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(closed);
        assert_eq!(connection.state(), ConnectionState::Disconnecting);

        connection.close(DisconnectReason::RemoteHostClosed, false);
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert_eq!(connection.disconnect_reason(), Some(&DisconnectReason::RemoteHostClosed));
    }
}
