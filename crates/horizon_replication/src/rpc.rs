//! Entity RPC queues.
//!
//! Outgoing RPCs wait in a per-connection FIFO until the manager drains it
//! after the tick's state sends. Incoming RPCs that target an entity the peer
//! has not created on our side yet are parked as orphans until the entity
//! shows up or the timeout passes.

use crate::message::EntityRpcMessage;
use crate::types::NetEntityId;
use std::collections::{HashMap, VecDeque};

/// FIFO of outgoing RPCs awaiting serialization.
#[derive(Debug, Default)]
pub struct RpcQueue {
    pending: VecDeque<EntityRpcMessage>,
}

impl RpcQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rpc: EntityRpcMessage) {
        self.pending.push_back(rpc);
    }

    /// Removes every queued RPC in enqueue order.
    pub fn drain(&mut self) -> impl Iterator<Item = EntityRpcMessage> + '_ {
        self.pending.drain(..)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[derive(Debug)]
struct OrphanedEntityRpcs {
    deadline_ms: u64,
    rpcs: Vec<EntityRpcMessage>,
}

/// Inbound RPCs held for entities that do not exist locally yet.
#[derive(Debug, Default)]
pub struct OrphanedRpcs {
    by_entity: HashMap<NetEntityId, OrphanedEntityRpcs>,
}

impl OrphanedRpcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks an RPC. The deadline is set by the first orphan for the entity.
    pub fn add(&mut self, rpc: EntityRpcMessage, now_ms: u64, timeout_ms: u64) {
        self.by_entity
            .entry(rpc.entity)
            .or_insert_with(|| OrphanedEntityRpcs {
                deadline_ms: now_ms.saturating_add(timeout_ms),
                rpcs: Vec::new(),
            })
            .rpcs
            .push(rpc);
    }

    /// Releases the RPCs held for an entity in arrival order.
    pub fn take(&mut self, entity: NetEntityId) -> Vec<EntityRpcMessage> {
        self.by_entity
            .remove(&entity)
            .map(|orphans| orphans.rpcs)
            .unwrap_or_default()
    }

    /// Drops orphans whose deadline passed and returns how many RPCs were lost.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let mut dropped = 0;
        self.by_entity.retain(|_, orphans| {
            if now_ms >= orphans.deadline_ms {
                dropped += orphans.rpcs.len();
                false
            } else {
                true
            }
        });
        dropped
    }

    pub fn len(&self) -> usize {
        self.by_entity.values().map(|orphans| orphans.rpcs.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_entity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc(entity: u64, name: &str) -> EntityRpcMessage {
        EntityRpcMessage::new(NetEntityId::new(entity), name, Vec::new())
    }

    #[test]
    fn test_queue_is_fifo() {
        let mut queue = RpcQueue::new();
        queue.push(rpc(1, "a"));
        queue.push(rpc(2, "b"));
        queue.push(rpc(1, "c"));

        let names: Vec<_> = queue.drain().map(|r| r.rpc_name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_orphans_released_or_expired() {
        let mut orphans = OrphanedRpcs::new();
        orphans.add(rpc(7, "first"), 0, 100);
        orphans.add(rpc(7, "second"), 50, 100);
        orphans.add(rpc(8, "lost"), 10, 100);
        assert_eq!(orphans.len(), 3);

        let released: Vec<_> = orphans.take(NetEntityId::new(7)).into_iter().map(|r| r.rpc_name).collect();
        assert_eq!(released, vec!["first", "second"]);

        assert_eq!(orphans.expire(109), 0);
        assert_eq!(orphans.expire(110), 1);
        assert!(orphans.is_empty());
    }
}
