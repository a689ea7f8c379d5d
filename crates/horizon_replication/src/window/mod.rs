//! Interest management.
//!
//! A replication window decides, per connection, which entities the remote
//! peer should know about and with which role, and how many replicators may be
//! serviced per tick. The replication manager only consumes this contract; the
//! policy behind it is pluggable.
//!
//! ## Implementations
//!
//! - [`NullReplicationWindow`] - replicates nothing; the default for new managers
//! - [`ProximityReplicationWindow`] - everything within a radius of an observer

use crate::types::{NetEntityId, NetEntityRole};
use std::collections::BTreeMap;

pub mod null;
pub mod proximity;

pub use null::NullReplicationWindow;
pub use proximity::{EntityPositions, Observer, ProximityReplicationWindow};

/// Target entity set of one connection with the remote role of each entity.
///
/// Ordered so it can be walked in lockstep with the manager's replicator map.
pub type ReplicationSet = BTreeMap<NetEntityId, NetEntityRole>;

/// Interest-management policy for one connection.
pub trait ReplicationWindow: Send {
    /// Whether the replication set changed since the last call and should be
    /// reconciled. A window may self-throttle and report false, in which case
    /// the previous set stays in effect.
    fn replication_set_update_ready(&mut self) -> bool;

    /// Current target set.
    fn replication_set(&self) -> &ReplicationSet;

    /// Maximum number of replicators serviced per tick.
    fn max_entity_replicator_send_count(&self) -> usize;

    /// Point query against the current set.
    fn is_in_window(&self, entity: NetEntityId) -> Option<NetEntityRole>;

    /// Recomputes internal state ahead of [`replication_set`](Self::replication_set).
    fn update_window(&mut self, now_ms: u64);

    /// Emits a diagnostic description of the window.
    fn debug_draw(&self);
}
