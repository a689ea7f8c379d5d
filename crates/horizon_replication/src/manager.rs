//! # Entity Replication Manager
//!
//! One manager exists per connection. Each tick it reconciles the target set
//! reported by the connection's [`ReplicationWindow`] against its live
//! [`EntityReplicator`]s and writes creation, delta, removal and RPC messages
//! into the connection's outbound buffer. It never touches a socket.
//!
//! ## Tick Flow
//!
//! 1. [`activate_pending_entities`](EntityReplicationManager::activate_pending_entities)
//!    admits deferred entities while the admission cap allows
//! 2. [`update_window`](EntityReplicationManager::update_window) refreshes the
//!    window and reconciles: new entities join the deferral FIFO, departed ones
//!    start their removal grace period, returning ones are restored
//! 3. [`send_updates`](EntityReplicationManager::send_updates) emits expired
//!    removals, then state for eligible replicators within the send budget,
//!    then the RPC queue
//!
//! ## Authority
//!
//! The [`ReplicationMode`] decides which inbound state a manager accepts. A
//! server never trusts a client except for entities the client controls
//! ([`NetEntityRole::Autonomous`]); a client trusts its server; a server
//! refuses peer updates for entities it is itself publishing.
//!
//! Between servers, authority over an entity can be handed over with
//! [`migrate_entity`](EntityReplicationManager::migrate_entity). The sender
//! stops publishing the entity and accepts the peer's state for it from then
//! on; the receiver becomes its publisher.

use crate::codec::EntityStateCodec;
use crate::config::ReplicationSettings;
use crate::error::ReplicationError;
use crate::message::{encode_frame, EntityRpcMessage, ReplicationMessage};
use crate::replicator::{EntityReplicator, ReplicatorState};
use crate::rpc::{OrphanedRpcs, RpcQueue};
use crate::types::{NetEntityId, NetEntityRole, StateVersion, EMPTY_STATE_VERSION};
use crate::window::{NullReplicationWindow, ReplicationSet, ReplicationWindow};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Authority direction of a manager, derived from its connection's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ReplicationMode {
    LocalServerToRemoteClient,
    LocalClientToRemoteServer,
    LocalServerToRemoteServer,
}

/// Outcome of validating an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateValidationResult {
    /// Applied
    HandleMessage,
    /// Ignored; the peer is still trusted
    DropMessage,
    /// Ignored; the peer broke the authority contract and must be disconnected
    DropMessageAndDisconnect,
}

/// Diagnostic counters for one manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplicationStats {
    pub replicators: usize,
    pub pending_create: usize,
    pub active: usize,
    pub pending_remove: usize,
    pub deferred: usize,
    pub remote_entities: usize,
    pub orphaned_rpcs: usize,
    pub creates_sent: u64,
    pub updates_sent: u64,
    pub removes_sent: u64,
    pub rpcs_sent: u64,
    pub rpcs_received: u64,
}

#[derive(Debug, Default)]
struct SendCounters {
    creates: u64,
    updates: u64,
    removes: u64,
    rpcs_sent: u64,
    rpcs_received: u64,
}

/// An entity the peer replicates to us.
#[derive(Debug, Clone, Copy)]
struct RemoteEntity {
    role: NetEntityRole,
    last_version: StateVersion,
    created_by_peer: bool,
}

/// Drives replication of entities to and from one remote peer.
pub struct EntityReplicationManager {
    mode: ReplicationMode,
    codec: Arc<dyn EntityStateCodec>,
    window: Box<dyn ReplicationWindow>,
    replicators: BTreeMap<NetEntityId, EntityReplicator>,
    deferred: VecDeque<NetEntityId>,
    deferred_set: HashSet<NetEntityId>,
    resets: Vec<NetEntityId>,
    rpc_queue: RpcQueue,
    received_rpcs: VecDeque<EntityRpcMessage>,
    orphaned_rpcs: OrphanedRpcs,
    remote_entities: HashMap<NetEntityId, RemoteEntity>,
    peer_authority: HashSet<NetEntityId>,
    max_pending_creation: usize,
    entity_pending_removal_ms: u64,
    orphaned_rpc_timeout_ms: u64,
    counters: SendCounters,
}

impl EntityReplicationManager {
    /// Creates a manager with a [`NullReplicationWindow`].
    pub fn new(
        mode: ReplicationMode,
        settings: &ReplicationSettings,
        codec: Arc<dyn EntityStateCodec>,
    ) -> Self {
        Self {
            mode,
            codec,
            window: Box::new(NullReplicationWindow::new()),
            replicators: BTreeMap::new(),
            deferred: VecDeque::new(),
            deferred_set: HashSet::new(),
            resets: Vec::new(),
            rpc_queue: RpcQueue::new(),
            received_rpcs: VecDeque::new(),
            orphaned_rpcs: OrphanedRpcs::new(),
            remote_entities: HashMap::new(),
            peer_authority: HashSet::new(),
            max_pending_creation: settings.max_remote_entities_pending_creation,
            entity_pending_removal_ms: settings.entity_pending_removal_ms,
            orphaned_rpc_timeout_ms: settings.orphaned_rpc_timeout_ms,
            counters: SendCounters::default(),
        }
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub fn window(&self) -> &dyn ReplicationWindow {
        self.window.as_ref()
    }

    /// Installs a new window and reconciles against it immediately.
    pub fn set_replication_window(&mut self, window: Box<dyn ReplicationWindow>, now_ms: u64) {
        self.window = window;
        self.window.update_window(now_ms);
        // The previous set means nothing to the new window.
        self.window.replication_set_update_ready();
        self.reconcile(now_ms);
    }

    pub fn set_max_remote_entities_pending_creation_count(&mut self, count: usize) {
        self.max_pending_creation = count;
    }

    pub fn set_entity_pending_removal_ms(&mut self, ms: u64) {
        self.entity_pending_removal_ms = ms;
    }

    pub fn set_orphaned_rpc_timeout_ms(&mut self, ms: u64) {
        self.orphaned_rpc_timeout_ms = ms;
    }

    pub fn max_remote_entities_pending_creation_count(&self) -> usize {
        self.max_pending_creation
    }

    pub fn entity_pending_removal_ms(&self) -> u64 {
        self.entity_pending_removal_ms
    }

    pub fn replicator(&self, entity: NetEntityId) -> Option<&EntityReplicator> {
        self.replicators.get(&entity)
    }

    pub fn replicator_count(&self) -> usize {
        self.replicators.len()
    }

    pub fn replicator_count_for_role(&self, role: NetEntityRole) -> usize {
        self.replicators
            .values()
            .filter(|rep| rep.remote_role() == role)
            .count()
    }

    /// Replicators still holding an admission slot.
    pub fn pending_creation_count(&self) -> usize {
        self.replicators
            .values()
            .filter(|rep| rep.is_awaiting_creation())
            .count()
    }

    pub fn deferred_count(&self) -> usize {
        self.deferred.len()
    }

    /// Entities waiting for admission, oldest first.
    pub fn deferred_entities(&self) -> impl Iterator<Item = NetEntityId> + '_ {
        self.deferred.iter().copied()
    }

    /// Role the peer assigned us for an entity it replicates to us.
    pub fn remote_entity_role(&self, entity: NetEntityId) -> Option<NetEntityRole> {
        self.remote_entities.get(&entity).map(|remote| remote.role)
    }

    /// Whether authority over the entity was migrated to the peer.
    pub fn is_peer_authoritative(&self, entity: NetEntityId) -> bool {
        self.peer_authority.contains(&entity)
    }

    pub fn stats(&self) -> ReplicationStats {
        let mut stats = ReplicationStats {
            replicators: self.replicators.len(),
            deferred: self.deferred.len(),
            remote_entities: self.remote_entities.len(),
            orphaned_rpcs: self.orphaned_rpcs.len(),
            creates_sent: self.counters.creates,
            updates_sent: self.counters.updates,
            removes_sent: self.counters.removes,
            rpcs_sent: self.counters.rpcs_sent,
            rpcs_received: self.counters.rpcs_received,
            ..Default::default()
        };
        for rep in self.replicators.values() {
            match rep.state() {
                ReplicatorState::PendingCreate => stats.pending_create += 1,
                ReplicatorState::Active => stats.active += 1,
                ReplicatorState::PendingRemove => stats.pending_remove += 1,
                ReplicatorState::Removed => {}
            }
        }
        stats
    }

    /// Admits deferred entities in FIFO order while the admission cap allows.
    ///
    /// Entries whose entity left the window since deferral are discarded.
    pub fn activate_pending_entities(&mut self, now_ms: u64) {
        let mut pending = self.pending_creation_count();

        while pending < self.max_pending_creation {
            let Some(entity) = self.deferred.pop_front() else {
                break;
            };
            self.deferred_set.remove(&entity);

            if self.replicators.contains_key(&entity) || self.peer_authority.contains(&entity) {
                continue;
            }
            let Some(role) = self.window.is_in_window(entity).filter(NetEntityRole::is_valid) else {
                trace!("🪟 {} left the window before admission", entity);
                continue;
            };

            self.replicators
                .insert(entity, EntityReplicator::new(entity, role, now_ms));
            pending += 1;
            trace!("➕ Admitted {} as {} (pending creation: {})", entity, role, pending);
        }
    }

    /// Refreshes the window and reconciles replicators if its set changed.
    pub fn update_window(&mut self, now_ms: u64) {
        self.window.update_window(now_ms);
        if self.window.replication_set_update_ready() {
            self.reconcile(now_ms);
        }
    }

    fn defer(&mut self, entity: NetEntityId) {
        if self.deferred_set.insert(entity) {
            self.deferred.push_back(entity);
        }
    }

    fn reconcile(&mut self, now_ms: u64) {
        let target: ReplicationSet = self.window.replication_set().clone();
        let mut role_changes = Vec::new();

        for (&entity, &role) in &target {
            if !role.is_valid() {
                continue;
            }
            match self.replicators.get_mut(&entity) {
                Some(rep) if rep.remote_role() != role => role_changes.push(entity),
                Some(rep) => {
                    if rep.is_pending_removal() {
                        rep.clear_pending_removal();
                        trace!("↩️ {} re-entered the window, now {:?}", entity, rep.state());
                    }
                }
                None if self.peer_authority.contains(&entity) => {}
                None => self.defer(entity),
            }
        }

        // A role change restarts the entity on the peer from scratch.
        for entity in role_changes {
            if let Some(rep) = self.replicators.remove(&entity) {
                debug!("🔁 Resetting {} ({} -> {:?})", entity, rep.remote_role(), target.get(&entity));
                if rep.create_sent() {
                    self.resets.push(entity);
                }
            }
            self.defer(entity);
        }

        let departed: Vec<NetEntityId> = self
            .replicators
            .iter()
            .filter(|(entity, rep)| !target.contains_key(entity) && !rep.is_pending_removal())
            .map(|(entity, _)| *entity)
            .collect();

        let deadline = now_ms.saturating_add(self.entity_pending_removal_ms);
        for entity in departed {
            let Some(rep) = self.replicators.get_mut(&entity) else {
                continue;
            };
            if rep.create_sent() {
                rep.set_pending_removal(deadline);
                trace!("⏳ {} left the window, removal at {}ms", entity, deadline);
            } else {
                // The peer never heard of it.
                self.replicators.remove(&entity);
                trace!("➖ Dropped unsent {}", entity);
            }
        }

        self.deferred.retain(|entity| target.contains_key(entity));
        self.deferred_set.retain(|entity| target.contains_key(entity));

        self.activate_pending_entities(now_ms);
    }

    /// Writes this tick's outgoing messages into `out`.
    ///
    /// A message that cannot be framed is logged and skipped; the rest of the
    /// tick's messages are still written. Returns the number of bytes written.
    pub fn send_updates(&mut self, now_ms: u64, out: &mut Vec<u8>) -> usize {
        let mut written = 0;

        for entity in std::mem::take(&mut self.resets) {
            if let Some(len) = write_frame(&ReplicationMessage::EntityRemove { entity }, out) {
                written += len;
                self.counters.removes += 1;
            }
        }

        let due: Vec<NetEntityId> = self
            .replicators
            .values()
            .filter(|rep| rep.is_removal_due(now_ms))
            .map(EntityReplicator::entity)
            .collect();
        for entity in due {
            if let Some(mut rep) = self.replicators.remove(&entity) {
                rep.mark_removed();
                if let Some(len) = write_frame(&ReplicationMessage::EntityRemove { entity }, out) {
                    written += len;
                    self.counters.removes += 1;
                }
                debug!("🗑️ Removed {} after grace period", entity);
            }
        }

        written += self.send_entity_state(now_ms, out);

        for rpc in self.rpc_queue.drain() {
            if !self.replicators.contains_key(&rpc.entity) {
                warn!("📭 Dropping RPC '{}' for {} which is not replicated to this peer", rpc.rpc_name, rpc.entity);
                continue;
            }
            if let Some(len) = write_frame(&ReplicationMessage::EntityRpc(rpc), out) {
                written += len;
                self.counters.rpcs_sent += 1;
            }
        }

        let expired = self.orphaned_rpcs.expire(now_ms);
        if expired > 0 {
            warn!("⌛ Dropped {} orphaned RPC(s) whose entity never arrived", expired);
        }

        written
    }

    fn send_entity_state(&mut self, now_ms: u64, out: &mut Vec<u8>) -> usize {
        let mut candidates: Vec<(u8, u64, NetEntityId, StateVersion)> = self
            .replicators
            .values()
            .filter_map(|rep| {
                let version = self.codec.current_version(rep.entity())?;
                rep.needs_send(version)
                    .then(|| (rep.tier(), rep.waiting_since_ms(), rep.entity(), version))
            })
            .collect();
        candidates.sort_unstable();

        let budget = self.window.max_entity_replicator_send_count();
        let mut serviced = 0;
        let mut written = 0;

        for (_, _, entity, version) in candidates {
            let Some(rep) = self.replicators.get_mut(&entity) else {
                continue;
            };
            let autonomous = rep.remote_role() == NetEntityRole::Autonomous;
            if !autonomous && serviced >= budget {
                continue;
            }

            let creating = !rep.create_sent();
            let since = if creating {
                EMPTY_STATE_VERSION
            } else {
                rep.last_sent_version()
            };
            let data = match self.codec.encode_delta(entity, since) {
                Ok(data) => data,
                Err(e) => {
                    warn!("⚠️ Failed to encode {}: {}", entity, e);
                    continue;
                }
            };

            let message = if creating {
                ReplicationMessage::EntityCreate {
                    entity,
                    role: rep.remote_role(),
                    version,
                    data,
                }
            } else {
                ReplicationMessage::EntityUpdate { entity, version, data }
            };
            let Some(len) = write_frame(&message, out) else {
                // Retried once the entity changes again; holds no budget.
                rep.mark_send_rejected(version);
                continue;
            };
            written += len;

            if creating {
                rep.mark_create_sent(version, now_ms);
                self.counters.creates += 1;
            } else {
                rep.mark_update_sent(version, now_ms);
                self.counters.updates += 1;
            }
            if !autonomous {
                serviced += 1;
            }
        }

        written
    }

    /// Queues an RPC for the next [`send_updates`](Self::send_updates).
    pub fn queue_rpc(&mut self, rpc: EntityRpcMessage) {
        self.rpc_queue.push(rpc);
    }

    pub fn queued_rpc_count(&self) -> usize {
        self.rpc_queue.len()
    }

    /// Takes every RPC received from the peer, in arrival order.
    pub fn drain_received_rpcs(&mut self) -> Vec<EntityRpcMessage> {
        self.received_rpcs.drain(..).collect()
    }

    /// Validates and applies one inbound message.
    ///
    /// Acknowledgements for applied state are written to `out`.
    pub fn handle_message(
        &mut self,
        message: ReplicationMessage,
        now_ms: u64,
        out: &mut Vec<u8>,
    ) -> UpdateValidationResult {
        match message {
            ReplicationMessage::EntityAck { entity, version } => {
                if let Some(rep) = self.replicators.get_mut(&entity) {
                    if rep.acknowledge(version) {
                        trace!("✅ {} created on peer at version {}", entity, version);
                    }
                }
                UpdateValidationResult::HandleMessage
            }
            ReplicationMessage::EntityCreate { entity, role, version, data } => {
                match self.validate_state_message(entity, true) {
                    UpdateValidationResult::HandleMessage => {
                        self.apply_remote_state(entity, Some(role), version, &data, out)
                    }
                    rejected => rejected,
                }
            }
            ReplicationMessage::EntityUpdate { entity, version, data } => {
                match self.validate_state_message(entity, false) {
                    UpdateValidationResult::HandleMessage => {
                        self.apply_remote_state(entity, None, version, &data, out)
                    }
                    rejected => rejected,
                }
            }
            ReplicationMessage::EntityRemove { entity } => self.handle_remove(entity),
            ReplicationMessage::EntityRpc(rpc) => self.handle_rpc(rpc, now_ms),
            ReplicationMessage::EntityMigration { entity, version, data } => {
                self.handle_migration(entity, version, &data, now_ms)
            }
        }
    }

    fn validate_state_message(&self, entity: NetEntityId, is_create: bool) -> UpdateValidationResult {
        match self.mode {
            ReplicationMode::LocalServerToRemoteClient => {
                if is_create {
                    warn!("🚫 Client attempted to create {}", entity);
                    return UpdateValidationResult::DropMessageAndDisconnect;
                }
                match self.replicators.get(&entity) {
                    Some(rep) if rep.is_pending_removal() => UpdateValidationResult::DropMessage,
                    Some(rep) if rep.remote_role() == NetEntityRole::Autonomous => {
                        UpdateValidationResult::HandleMessage
                    }
                    Some(rep) => {
                        warn!(
                            "🚫 Client sent state for {} it does not control (role {})",
                            entity,
                            rep.remote_role()
                        );
                        UpdateValidationResult::DropMessageAndDisconnect
                    }
                    None => UpdateValidationResult::DropMessage,
                }
            }
            ReplicationMode::LocalClientToRemoteServer => UpdateValidationResult::HandleMessage,
            ReplicationMode::LocalServerToRemoteServer => match self.replicators.get(&entity) {
                Some(rep) if !rep.is_pending_removal() => {
                    trace!("Ignoring peer state for {}, we are publishing it", entity);
                    UpdateValidationResult::DropMessage
                }
                _ => UpdateValidationResult::HandleMessage,
            },
        }
    }

    fn apply_remote_state(
        &mut self,
        entity: NetEntityId,
        create_role: Option<NetEntityRole>,
        version: StateVersion,
        data: &[u8],
        out: &mut Vec<u8>,
    ) -> UpdateValidationResult {
        let known = self.remote_entities.get(&entity).copied();
        let (role, created_by_peer) = match (create_role, known) {
            (_, Some(remote)) if version <= remote.last_version => {
                trace!("Dropping stale state {} for {} (have {})", version, entity, remote.last_version);
                return UpdateValidationResult::DropMessage;
            }
            (Some(role), _) => (role, true),
            (None, Some(remote)) => (remote.role, remote.created_by_peer),
            (None, None) if self.mode == ReplicationMode::LocalServerToRemoteClient => {
                (NetEntityRole::Authority, false)
            }
            (None, None) => {
                warn!("❓ Update for unknown {}", entity);
                return UpdateValidationResult::DropMessage;
            }
        };

        if let Err(e) = self.codec.apply_delta(entity, data) {
            warn!("⚠️ Failed to apply state for {}: {}", entity, e);
            return UpdateValidationResult::DropMessage;
        }

        self.remote_entities.insert(
            entity,
            RemoteEntity {
                role,
                last_version: version,
                created_by_peer,
            },
        );

        if let Err(e) = encode_frame(&ReplicationMessage::EntityAck { entity, version }, out) {
            warn!("⚠️ Failed to acknowledge {}: {}", entity, e);
        }

        if create_role.is_some() {
            let released = self.orphaned_rpcs.take(entity);
            if !released.is_empty() {
                debug!("📬 Delivering {} orphaned RPC(s) for {}", released.len(), entity);
                self.received_rpcs.extend(released);
            }
        }

        UpdateValidationResult::HandleMessage
    }

    fn handle_remove(&mut self, entity: NetEntityId) -> UpdateValidationResult {
        match self.mode {
            ReplicationMode::LocalServerToRemoteClient => {
                warn!("🚫 Client attempted to remove {}", entity);
                return UpdateValidationResult::DropMessageAndDisconnect;
            }
            ReplicationMode::LocalServerToRemoteServer
                if self
                    .replicators
                    .get(&entity)
                    .is_some_and(|rep| !rep.is_pending_removal()) =>
            {
                return UpdateValidationResult::DropMessage;
            }
            _ => {}
        }

        if let Some(remote) = self.remote_entities.remove(&entity) {
            if remote.created_by_peer {
                self.codec.remove_entity(entity);
            }
        }
        self.peer_authority.remove(&entity);
        self.orphaned_rpcs.take(entity);
        UpdateValidationResult::HandleMessage
    }

    /// Hands authority over `entity` to the peer.
    ///
    /// Only a server talking to another server can migrate, and only an entity
    /// it publishes whose creation the peer has acknowledged and which is not
    /// leaving the window. The full state is written to `out` as an
    /// [`EntityMigration`](ReplicationMessage::EntityMigration); the replicator
    /// is dropped without a removal and the entity is not published to this
    /// peer again until the peer removes it or migrates it back.
    pub fn migrate_entity(
        &mut self,
        entity: NetEntityId,
        out: &mut Vec<u8>,
    ) -> Result<StateVersion, ReplicationError> {
        let refuse = |reason| ReplicationError::Migration { entity, reason };

        if self.mode != ReplicationMode::LocalServerToRemoteServer {
            return Err(refuse("only servers migrate entities to servers"));
        }
        let rep = self
            .replicators
            .get(&entity)
            .ok_or_else(|| refuse("entity is not replicated to this peer"))?;
        if rep.is_pending_removal() {
            return Err(refuse("entity is leaving the peer's window"));
        }
        if !rep.is_acknowledged() {
            return Err(refuse("peer has not acknowledged the entity"));
        }
        let version = self
            .codec
            .current_version(entity)
            .ok_or_else(|| refuse("entity has no state"))?;

        let data = self.codec.encode_delta(entity, EMPTY_STATE_VERSION)?;
        encode_frame(&ReplicationMessage::EntityMigration { entity, version, data }, out)?;

        self.replicators.remove(&entity);
        self.peer_authority.insert(entity);
        self.remote_entities.insert(
            entity,
            RemoteEntity {
                role: NetEntityRole::Server,
                last_version: EMPTY_STATE_VERSION,
                created_by_peer: false,
            },
        );
        info!("🚚 Migrated {} to peer at version {}", entity, version);
        Ok(version)
    }

    /// Migrates every entity [`migrate_entity`](Self::migrate_entity) accepts.
    ///
    /// Returns the number of entities handed over.
    pub fn migrate_all_entities(&mut self, out: &mut Vec<u8>) -> usize {
        let candidates: Vec<NetEntityId> = self.replicators.keys().copied().collect();
        candidates
            .into_iter()
            .filter(|&entity| match self.migrate_entity(entity, out) {
                Ok(_) => true,
                Err(e) => {
                    trace!("{}", e);
                    false
                }
            })
            .count()
    }

    fn handle_migration(
        &mut self,
        entity: NetEntityId,
        version: StateVersion,
        data: &[u8],
        now_ms: u64,
    ) -> UpdateValidationResult {
        if self.mode != ReplicationMode::LocalServerToRemoteServer {
            warn!("🚫 Peer attempted to migrate {} over a non server link", entity);
            return UpdateValidationResult::DropMessageAndDisconnect;
        }
        if self
            .replicators
            .get(&entity)
            .is_some_and(|rep| rep.create_sent() && !rep.is_pending_removal())
        {
            warn!("🚫 Peer migrated {} which we are publishing", entity);
            return UpdateValidationResult::DropMessageAndDisconnect;
        }

        if let Err(e) = self.codec.apply_delta(entity, data) {
            warn!("⚠️ Failed to apply migrated state for {}: {}", entity, e);
            return UpdateValidationResult::DropMessage;
        }

        // The entity is ours now; publish it back to the peer as a proxy.
        self.remote_entities.remove(&entity);
        self.peer_authority.remove(&entity);
        self.replicators.remove(&entity);
        if self.window.is_in_window(entity).is_some_and(|role| role.is_valid()) {
            self.defer(entity);
            self.activate_pending_entities(now_ms);
        }

        let released = self.orphaned_rpcs.take(entity);
        self.received_rpcs.extend(released);
        info!("🚚 Took authority over {} at peer version {}", entity, version);
        UpdateValidationResult::HandleMessage
    }

    fn handle_rpc(&mut self, rpc: EntityRpcMessage, now_ms: u64) -> UpdateValidationResult {
        let known_locally = self.replicators.contains_key(&rpc.entity);
        let known_remotely = self.remote_entities.contains_key(&rpc.entity);

        if self.mode == ReplicationMode::LocalServerToRemoteClient && !known_locally {
            warn!("🚫 Client RPC '{}' for {} which it cannot see", rpc.rpc_name, rpc.entity);
            return UpdateValidationResult::DropMessage;
        }

        self.counters.rpcs_received += 1;
        if known_locally || known_remotely {
            self.received_rpcs.push_back(rpc);
        } else {
            trace!("Parking RPC '{}' for unknown {}", rpc.rpc_name, rpc.entity);
            self.orphaned_rpcs.add(rpc, now_ms, self.orphaned_rpc_timeout_ms);
        }
        UpdateValidationResult::HandleMessage
    }

    /// Destroys every replicator.
    ///
    /// With `flush_final_packets` one best-effort removal is written per entity
    /// the peer knows about; otherwise nothing is written. Entities the peer
    /// created on our side are dropped from the codec either way. Returns the
    /// number of removal messages written.
    pub fn clear(&mut self, flush_final_packets: bool, out: &mut Vec<u8>) -> usize {
        let mut removals = 0;

        if flush_final_packets {
            let announced = self
                .resets
                .iter()
                .copied()
                .chain(
                    self.replicators
                        .values()
                        .filter(|rep| rep.create_sent())
                        .map(EntityReplicator::entity),
                )
                .collect::<Vec<_>>();
            for entity in announced {
                match encode_frame(&ReplicationMessage::EntityRemove { entity }, out) {
                    Ok(_) => removals += 1,
                    Err(e) => warn!("⚠️ Failed to write final removal for {}: {}", entity, e),
                }
            }
            self.counters.removes += removals as u64;
        }

        let destroyed = self.replicators.len();
        self.replicators.clear();
        self.deferred.clear();
        self.deferred_set.clear();
        self.resets.clear();
        self.rpc_queue.clear();
        self.received_rpcs.clear();
        self.orphaned_rpcs.clear();
        self.peer_authority.clear();
        for (entity, remote) in self.remote_entities.drain() {
            if remote.created_by_peer {
                self.codec.remove_entity(entity);
            }
        }

        debug!(
            "🧹 Cleared {} replicator(s), {} final removal(s) written",
            destroyed, removals
        );
        removals
    }

    /// Forwards to the window's diagnostic output.
    pub fn debug_draw(&self) {
        self.window.debug_draw();
    }
}

/// Appends one frame to `out`, or logs and skips a message that cannot be framed.
fn write_frame(message: &ReplicationMessage, out: &mut Vec<u8>) -> Option<usize> {
    match encode_frame(message, out) {
        Ok(len) => Some(len),
        Err(e) => {
            warn!("⚠️ Skipping {} for {}: {}", message.kind(), message.entity(), e);
            None
        }
    }
}
