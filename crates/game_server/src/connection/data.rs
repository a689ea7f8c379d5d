//! Role-tagged replication data attached to a connection.

use super::{ConnectionId, ConnectionListener, ConnectionMode};
use crate::error::ServerError;
use horizon_replication::{
    decode_frames, EntityReplicationManager, EntityStateCodec, ReplicationSettings,
    ReplicationWindow, UpdateValidationResult,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Replication state of one connection.
///
/// The [`ConnectionMode`] tag selects the authority direction of the owned
/// manager; there is one struct for every role. Dropping it tears the manager
/// down without final packets; use [`close_gracefully`](Self::close_gracefully)
/// first when the peer should hear about the removals.
pub struct ConnectionData {
    connection_id: ConnectionId,
    mode: ConnectionMode,
    listener: Arc<dyn ConnectionListener>,
    manager: EntityReplicationManager,
}

impl ConnectionData {
    pub fn new(
        connection_id: ConnectionId,
        mode: ConnectionMode,
        listener: Arc<dyn ConnectionListener>,
        settings: &ReplicationSettings,
        codec: Arc<dyn EntityStateCodec>,
    ) -> Self {
        Self {
            connection_id,
            mode,
            listener,
            manager: EntityReplicationManager::new(mode.replication_mode(), settings, codec),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn listener(&self) -> &Arc<dyn ConnectionListener> {
        &self.listener
    }

    pub fn replication_manager(&self) -> &EntityReplicationManager {
        &self.manager
    }

    pub fn replication_manager_mut(&mut self) -> &mut EntityReplicationManager {
        &mut self.manager
    }

    pub fn set_replication_window(&mut self, window: Box<dyn ReplicationWindow>, host_time_ms: u64) {
        self.manager.set_replication_window(window, host_time_ms);
    }

    /// Runs one host tick and appends the outgoing bytes to `out`.
    pub fn update(&mut self, host_time_ms: u64, out: &mut Vec<u8>) {
        self.manager.activate_pending_entities(host_time_ms);
        self.manager.update_window(host_time_ms);
        let written = self.manager.send_updates(host_time_ms, out);
        if written > 0 {
            trace!("Connection {}: queued {} bytes", self.connection_id, written);
        }
    }

    /// Decodes complete frames from `buffer` and dispatches them.
    ///
    /// Returns [`ServerError::ProtocolViolation`] for malformed frames or for
    /// messages the manager refuses with a disconnect.
    pub fn handle_incoming(
        &mut self,
        buffer: &mut Vec<u8>,
        host_time_ms: u64,
        out: &mut Vec<u8>,
    ) -> Result<(), ServerError> {
        let messages =
            decode_frames(buffer).map_err(|e| ServerError::ProtocolViolation(e.to_string()))?;

        for message in messages {
            let entity = message.entity();
            if self.manager.handle_message(message, host_time_ms, out)
                == UpdateValidationResult::DropMessageAndDisconnect
            {
                return Err(ServerError::ProtocolViolation(format!(
                    "unauthorized message for {entity}"
                )));
            }
        }
        Ok(())
    }

    /// Tears replication down with one best-effort removal per known entity.
    pub fn close_gracefully(&mut self, out: &mut Vec<u8>) -> usize {
        self.manager.clear(true, out)
    }
}

impl Drop for ConnectionData {
    fn drop(&mut self) {
        let abandoned = self.manager.replicator_count();
        self.manager.clear(false, &mut Vec::new());
        if abandoned > 0 {
            debug!(
                "Connection {}: abandoned {} replicator(s)",
                self.connection_id, abandoned
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::AllowAllListener;
    use horizon_replication::{
        encode_frame, EntityPositions, NetEntityId, Observer, PropertyStateCodec,
        ProximityReplicationWindow, ReplicationMessage, Vec3,
    };
    use serde_json::json;

    fn server_data(codec: Arc<PropertyStateCodec>) -> ConnectionData {
        ConnectionData::new(
            ConnectionId(1),
            ConnectionMode::ServerToClient,
            Arc::new(AllowAllListener),
            &ReplicationSettings::default(),
            codec,
        )
    }

    #[test]
    fn test_update_produces_creates_for_window() {
        let codec = Arc::new(PropertyStateCodec::new());
        let positions = Arc::new(EntityPositions::new());
        let entity = NetEntityId::new(3);
        codec.set_property(entity, "hp", json!(10));
        positions.set_position(entity, Vec3::new(1.0, 1.0, 0.0));

        let mut data = server_data(codec);
        data.set_replication_window(
            Box::new(ProximityReplicationWindow::new(positions, Observer::Point(Vec3::zero()), 10.0, 4, 0)),
            0,
        );

        let mut out = Vec::new();
        data.update(0, &mut out);
        let sent = decode_frames(&mut out).unwrap();
        assert!(matches!(sent[0], ReplicationMessage::EntityCreate { entity: e, .. } if e == entity));
        assert_eq!(data.replication_manager().replicator_count(), 1);
    }

    #[test]
    fn test_unauthorized_message_is_protocol_violation() {
        let mut data = server_data(Arc::new(PropertyStateCodec::new()));
        let mut inbound = Vec::new();
        encode_frame(&ReplicationMessage::EntityRemove { entity: NetEntityId::new(1) }, &mut inbound).unwrap();

        let result = data.handle_incoming(&mut inbound, 0, &mut Vec::new());
        assert!(matches!(result, Err(ServerError::ProtocolViolation(_))));
    }

    #[test]
    fn test_client_mode_accepts_server_state() {
        let codec = Arc::new(PropertyStateCodec::new());
        let mut data = ConnectionData::new(
            ConnectionId(2),
            ConnectionMode::ClientToServer,
            Arc::new(AllowAllListener),
            &ReplicationSettings::default(),
            codec.clone(),
        );

        let mut inbound = Vec::new();
        encode_frame(
            &ReplicationMessage::EntityCreate {
                entity: NetEntityId::new(8),
                role: horizon_replication::NetEntityRole::Client,
                version: 1,
                data: br#"{"properties":{"hp":5}}"#.to_vec(),
            },
            &mut inbound,
        )
        .unwrap();

        let mut out = Vec::new();
        data.handle_incoming(&mut inbound, 0, &mut out).unwrap();
        assert_eq!(codec.property(NetEntityId::new(8), "hp"), Some(json!(5)));
        assert!(!out.is_empty());
    }
}
