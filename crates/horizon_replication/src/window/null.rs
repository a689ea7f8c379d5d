use super::{ReplicationSet, ReplicationWindow};
use crate::types::{NetEntityId, NetEntityRole};
use tracing::debug;

/// Window that replicates nothing.
///
/// Always ready, always empty, zero send budget. Used until a connection is
/// given a real policy.
#[derive(Debug, Default)]
pub struct NullReplicationWindow {
    empty: ReplicationSet,
}

impl NullReplicationWindow {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplicationWindow for NullReplicationWindow {
    fn replication_set_update_ready(&mut self) -> bool {
        true
    }

    fn replication_set(&self) -> &ReplicationSet {
        &self.empty
    }

    fn max_entity_replicator_send_count(&self) -> usize {
        0
    }

    fn is_in_window(&self, _entity: NetEntityId) -> Option<NetEntityRole> {
        None
    }

    fn update_window(&mut self, _now_ms: u64) {}

    fn debug_draw(&self) {
        debug!("🪟 Null replication window (replicates nothing)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_window_stays_empty() {
        let mut window = NullReplicationWindow::new();

        for now in [0, 16, 1_000, u64::MAX] {
            window.update_window(now);
            assert!(window.replication_set_update_ready());
            assert!(window.replication_set().is_empty());
            assert_eq!(window.max_entity_replicator_send_count(), 0);
            assert_eq!(window.is_in_window(NetEntityId::new(now)), None);
        }
    }
}
