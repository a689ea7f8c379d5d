//! Runtime tunables for entity replication.

use serde::{Deserialize, Serialize};

fn default_max_remote_entities_pending_creation() -> usize {
    100
}

fn default_entity_pending_removal_ms() -> u64 {
    1000
}

fn default_orphaned_rpc_timeout_ms() -> u64 {
    1000
}

/// Settings read by every replication manager at construction.
///
/// All values can be changed afterwards through the manager's setters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Admission cap: replicators awaiting creation per connection
    #[serde(default = "default_max_remote_entities_pending_creation")]
    pub max_remote_entities_pending_creation: usize,
    /// Grace period before a replicator that left the window is removed
    #[serde(default = "default_entity_pending_removal_ms")]
    pub entity_pending_removal_ms: u64,
    /// How long inbound RPCs for unknown entities are held
    #[serde(default = "default_orphaned_rpc_timeout_ms")]
    pub orphaned_rpc_timeout_ms: u64,
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            max_remote_entities_pending_creation: default_max_remote_entities_pending_creation(),
            entity_pending_removal_ms: default_entity_pending_removal_ms(),
            orphaned_rpc_timeout_ms: default_orphaned_rpc_timeout_ms(),
        }
    }
}
