//! Per-entity, per-connection replication state.

use crate::types::{NetEntityId, NetEntityRole, StateVersion, EMPTY_STATE_VERSION};
use serde::Serialize;

/// Lifecycle of an [`EntityReplicator`].
///
/// `PendingCreate -> Active -> PendingRemove -> Removed`, with
/// `PendingRemove` returning to `Active` (or `PendingCreate` if the peer never
/// acknowledged the entity) when the entity re-enters the window in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReplicatorState {
    /// Admitted; waiting for the peer to acknowledge creation
    PendingCreate,
    /// Created on the peer and receiving deltas
    Active,
    /// Left the window; removal is sent when the grace timer expires
    PendingRemove,
    /// Torn down; the replicator is about to be dropped
    Removed,
}

/// Tracks what one remote peer knows about one entity.
#[derive(Debug, Clone)]
pub struct EntityReplicator {
    entity: NetEntityId,
    remote_role: NetEntityRole,
    state: ReplicatorState,
    acknowledged: bool,
    create_sent: bool,
    create_version: StateVersion,
    last_sent_version: StateVersion,
    last_acked_version: StateVersion,
    created_at_ms: u64,
    last_sent_ms: Option<u64>,
    removal_deadline_ms: Option<u64>,
    rejected_version: Option<StateVersion>,
}

impl EntityReplicator {
    pub fn new(entity: NetEntityId, remote_role: NetEntityRole, now_ms: u64) -> Self {
        Self {
            entity,
            remote_role,
            state: ReplicatorState::PendingCreate,
            acknowledged: false,
            create_sent: false,
            create_version: EMPTY_STATE_VERSION,
            last_sent_version: EMPTY_STATE_VERSION,
            last_acked_version: EMPTY_STATE_VERSION,
            created_at_ms: now_ms,
            last_sent_ms: None,
            removal_deadline_ms: None,
            rejected_version: None,
        }
    }

    pub fn entity(&self) -> NetEntityId {
        self.entity
    }

    pub fn remote_role(&self) -> NetEntityRole {
        self.remote_role
    }

    pub fn state(&self) -> ReplicatorState {
        self.state
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    pub fn create_sent(&self) -> bool {
        self.create_sent
    }

    pub fn last_sent_version(&self) -> StateVersion {
        self.last_sent_version
    }

    pub fn last_acked_version(&self) -> StateVersion {
        self.last_acked_version
    }

    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn removal_deadline_ms(&self) -> Option<u64> {
        self.removal_deadline_ms
    }

    pub fn is_pending_removal(&self) -> bool {
        self.state == ReplicatorState::PendingRemove
    }

    /// Still occupies an admission slot: the peer has not confirmed creation.
    pub fn is_awaiting_creation(&self) -> bool {
        !self.acknowledged && self.state != ReplicatorState::Removed
    }

    /// Whether the replicator has something to send at `current_version`.
    pub fn needs_send(&self, current_version: StateVersion) -> bool {
        if self.rejected_version == Some(current_version) {
            return false;
        }
        if !self.create_sent {
            return self.state == ReplicatorState::PendingCreate;
        }
        current_version > self.last_sent_version
    }

    /// Send tier; lower is serviced first.
    pub fn tier(&self) -> u8 {
        match self.state {
            ReplicatorState::PendingCreate => 0,
            ReplicatorState::Active => 1,
            ReplicatorState::PendingRemove => 2,
            ReplicatorState::Removed => 3,
        }
    }

    /// How long the replicator has been waiting, as a timestamp to sort by.
    pub fn waiting_since_ms(&self) -> u64 {
        match self.state {
            ReplicatorState::PendingCreate => self.created_at_ms,
            _ => self.last_sent_ms.unwrap_or(self.created_at_ms),
        }
    }

    pub fn mark_create_sent(&mut self, version: StateVersion, now_ms: u64) {
        self.create_sent = true;
        self.create_version = version;
        self.last_sent_version = version;
        self.last_sent_ms = Some(now_ms);
    }

    pub fn mark_update_sent(&mut self, version: StateVersion, now_ms: u64) {
        self.last_sent_version = version;
        self.last_sent_ms = Some(now_ms);
    }

    /// Records that the message for `version` could not be written. The
    /// replicator is not offered again until the entity's version moves on.
    pub fn mark_send_rejected(&mut self, version: StateVersion) {
        self.rejected_version = Some(version);
    }

    /// Records a peer acknowledgement. Returns true if it completed creation.
    pub fn acknowledge(&mut self, version: StateVersion) -> bool {
        self.last_acked_version = self.last_acked_version.max(version);

        if !self.create_sent || self.acknowledged || version < self.create_version {
            return false;
        }

        self.acknowledged = true;
        if self.state == ReplicatorState::PendingCreate {
            self.state = ReplicatorState::Active;
        }
        true
    }

    /// Starts the removal grace period.
    pub fn set_pending_removal(&mut self, deadline_ms: u64) {
        self.state = ReplicatorState::PendingRemove;
        self.removal_deadline_ms = Some(deadline_ms);
    }

    /// Cancels a pending removal after the entity re-entered the window.
    pub fn clear_pending_removal(&mut self) {
        if self.state != ReplicatorState::PendingRemove {
            return;
        }
        self.removal_deadline_ms = None;
        self.state = if self.acknowledged {
            ReplicatorState::Active
        } else {
            ReplicatorState::PendingCreate
        };
    }

    pub fn is_removal_due(&self, now_ms: u64) -> bool {
        self.state == ReplicatorState::PendingRemove
            && self.removal_deadline_ms.is_some_and(|deadline| now_ms >= deadline)
    }

    pub fn mark_removed(&mut self) {
        self.state = ReplicatorState::Removed;
        self.removal_deadline_ms = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replicator() -> EntityReplicator {
        EntityReplicator::new(NetEntityId::new(1), NetEntityRole::Client, 100)
    }

    #[test]
    fn test_ack_activates_only_after_create() {
        let mut rep = replicator();
        assert!(!rep.acknowledge(5));
        assert_eq!(rep.state(), ReplicatorState::PendingCreate);

        rep.mark_create_sent(5, 110);
        assert!(!rep.acknowledge(4));
        assert!(rep.acknowledge(5));
        assert_eq!(rep.state(), ReplicatorState::Active);
        assert!(!rep.is_awaiting_creation());
    }

    #[test]
    fn test_reentry_restores_previous_state() {
        let mut unacked = replicator();
        unacked.mark_create_sent(1, 100);
        unacked.set_pending_removal(1_100);
        unacked.clear_pending_removal();
        assert_eq!(unacked.state(), ReplicatorState::PendingCreate);

        let mut acked = replicator();
        acked.mark_create_sent(1, 100);
        acked.acknowledge(1);
        acked.set_pending_removal(1_100);
        assert!(!acked.is_removal_due(1_099));
        assert!(acked.is_removal_due(1_100));
        acked.clear_pending_removal();
        assert_eq!(acked.state(), ReplicatorState::Active);
        assert_eq!(acked.removal_deadline_ms(), None);
    }

    #[test]
    fn test_needs_send_tracks_versions() {
        let mut rep = replicator();
        assert!(rep.needs_send(0));

        rep.mark_create_sent(3, 120);
        assert!(!rep.needs_send(3));
        assert!(rep.needs_send(4));

        rep.mark_update_sent(4, 130);
        assert!(!rep.needs_send(4));
        assert_eq!(rep.waiting_since_ms(), 100);
        rep.acknowledge(3);
        assert_eq!(rep.waiting_since_ms(), 130);
    }

    #[test]
    fn test_rejected_version_is_not_offered_again() {
        let mut rep = replicator();
        rep.mark_send_rejected(2);
        assert!(!rep.needs_send(2));
        assert!(rep.needs_send(3));
        assert!(!rep.create_sent());
    }
}
