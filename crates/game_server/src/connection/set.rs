//! Dual-indexed registry of live connections.

use super::{Connection, ConnectionId, SocketHandle};
use std::collections::HashMap;
use tracing::warn;

/// Live connections of one network interface.
///
/// Every connection is reachable by both its [`ConnectionId`] and its
/// [`SocketHandle`]; the two indices always describe the same set.
#[derive(Debug)]
pub struct ConnectionSet {
    by_id: HashMap<ConnectionId, Connection>,
    by_socket: HashMap<SocketHandle, ConnectionId>,
    next_id: u64,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_socket: HashMap::new(),
            next_id: 1,
        }
    }

    /// Issues a fresh id. Ids are never reused within a set.
    pub fn get_next_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Registers a connection under both of its keys.
    ///
    /// Returns false and leaves the set untouched if either key is taken.
    pub fn add_connection(&mut self, connection: Connection) -> bool {
        let id = connection.id();
        let socket = connection.socket();

        if self.by_id.contains_key(&id) || self.by_socket.contains_key(&socket) {
            warn!("Refusing duplicate connection {} ({})", id, socket);
            return false;
        }

        self.by_socket.insert(socket, id);
        self.by_id.insert(id, connection);
        true
    }

    pub fn delete_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.by_id.remove(&id)?;
        self.by_socket.remove(&connection.socket());
        Some(connection)
    }

    pub fn delete_connection_by_socket(&mut self, socket: SocketHandle) -> Option<Connection> {
        let id = self.by_socket.remove(&socket)?;
        self.by_id.remove(&id)
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.by_id.get(&id)
    }

    pub fn get_connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.by_id.get_mut(&id)
    }

    pub fn get_connection_by_socket(&self, socket: SocketHandle) -> Option<&Connection> {
        self.by_socket.get(&socket).and_then(|id| self.by_id.get(id))
    }

    pub fn visit_connections<F>(&self, mut visitor: F)
    where
        F: FnMut(&Connection),
    {
        for connection in self.by_id.values() {
            visitor(connection);
        }
    }

    /// Visits every connection mutably.
    ///
    /// The visitor may close connections but cannot add or remove them;
    /// collect ids and delete afterwards.
    pub fn visit_connections_mut<F>(&mut self, mut visitor: F)
    where
        F: FnMut(&mut Connection),
    {
        for connection in self.by_id.values_mut() {
            visitor(connection);
        }
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.by_id.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}
