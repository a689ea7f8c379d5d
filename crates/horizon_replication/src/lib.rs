//! # Horizon Replication
//!
//! Entity replication for Horizon servers: deciding, per connection, which
//! networked entities a remote peer should see and keeping that peer's copy of
//! each entity consistent over a reliable byte stream.
//!
//! ## Architecture
//!
//! * **Replication windows** ([`window`]) compute the target entity set and a
//!   per-tick send budget for one connection
//! * **Replicators** ([`replicator`]) track what the peer knows about one entity:
//!   `PendingCreate -> Active -> PendingRemove -> Removed`
//! * **The manager** ([`manager`]) reconciles the window against replicators,
//!   enforces the admission cap, runs removal grace timers and serializes
//!   creates, deltas, removals and RPCs, and hands entity authority between
//!   servers
//! * **Codecs** ([`codec`]) produce and apply per-entity state deltas
//! * **Messages** ([`message`]) frame everything as length-prefixed JSON
//!
//! ## Threading
//!
//! Nothing in this crate performs I/O or spawns threads. A manager is owned by
//! one connection and driven synchronously from the host tick; only codecs and
//! position registries are shared between connections.
//!
//! ## Example
//!
//! ```rust
//! use horizon_replication::{
//!     EntityPositions, EntityReplicationManager, NetEntityId, Observer, PropertyStateCodec,
//!     ProximityReplicationWindow, ReplicationMode, ReplicationSettings, Vec3,
//! };
//! use std::sync::Arc;
//!
//! let codec = Arc::new(PropertyStateCodec::new());
//! let positions = Arc::new(EntityPositions::new());
//!
//! let crate_id = NetEntityId::new(1);
//! codec.set_property(crate_id, "health", serde_json::json!(100));
//! positions.set_position(crate_id, Vec3::new(3.0, 0.0, 0.0));
//!
//! let mut manager = EntityReplicationManager::new(
//!     ReplicationMode::LocalServerToRemoteClient,
//!     &ReplicationSettings::default(),
//!     codec,
//! );
//! manager.set_replication_window(
//!     Box::new(ProximityReplicationWindow::new(positions, Observer::Point(Vec3::zero()), 50.0, 32, 100)),
//!     0,
//! );
//!
//! let mut outbound = Vec::new();
//! manager.activate_pending_entities(0);
//! manager.update_window(0);
//! let written = manager.send_updates(0, &mut outbound);
//! assert_eq!(written, outbound.len());
//! assert!(!outbound.is_empty());
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod manager;
pub mod message;
pub mod replicator;
pub mod rpc;
pub mod types;
pub mod window;

pub use codec::{EntityStateCodec, PropertyStateCodec};
pub use config::ReplicationSettings;
pub use error::{CodecError, ReplicationError};
pub use manager::{EntityReplicationManager, ReplicationMode, ReplicationStats, UpdateValidationResult};
pub use message::{decode_frames, encode_frame, EntityRpcMessage, ReplicationMessage, MAX_FRAME_SIZE};
pub use replicator::{EntityReplicator, ReplicatorState};
pub use rpc::{OrphanedRpcs, RpcQueue};
pub use types::{NetEntityId, NetEntityRole, StateVersion, Vec3, EMPTY_STATE_VERSION};
pub use window::{
    EntityPositions, NullReplicationWindow, Observer, ProximityReplicationWindow, ReplicationSet,
    ReplicationWindow,
};
