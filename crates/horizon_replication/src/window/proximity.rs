//! Radius based replication window.
//!
//! Entities are relevant to a connection while they sit within `radius` of an
//! observer. The observer is either a fixed point or an entity whose position
//! is tracked in the shared [`EntityPositions`] registry; in the latter case
//! that entity is reported with the [`Autonomous`](NetEntityRole::Autonomous)
//! role because the remote peer controls it.

use super::{ReplicationSet, ReplicationWindow};
use crate::types::{NetEntityId, NetEntityRole, Vec3};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Positions of every networked entity, shared by all proximity windows.
#[derive(Debug, Default)]
pub struct EntityPositions {
    positions: DashMap<NetEntityId, Vec3>,
}

impl EntityPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&self, entity: NetEntityId, position: Vec3) {
        self.positions.insert(entity, position);
    }

    pub fn position(&self, entity: NetEntityId) -> Option<Vec3> {
        self.positions.get(&entity).map(|p| *p)
    }

    pub fn remove(&self, entity: NetEntityId) -> Option<Vec3> {
        self.positions.remove(&entity).map(|(_, position)| position)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Entities within `radius` of `center`.
    pub fn within_radius(&self, center: Vec3, radius: f64) -> Vec<NetEntityId> {
        let radius_sq = radius * radius;
        self.positions
            .iter()
            .filter(|entry| entry.value().distance_squared(center) <= radius_sq)
            .map(|entry| *entry.key())
            .collect()
    }
}

/// Point of view a proximity window measures distance from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observer {
    /// A fixed location in the world
    Point(Vec3),
    /// An entity the remote peer controls
    Entity(NetEntityId),
}

/// Replicates everything within a radius of an observer.
pub struct ProximityReplicationWindow {
    positions: Arc<EntityPositions>,
    observer: Observer,
    radius: f64,
    max_send_count: usize,
    update_interval_ms: u64,
    next_update_ms: u64,
    update_ready: bool,
    replication_set: ReplicationSet,
}

impl ProximityReplicationWindow {
    pub fn new(
        positions: Arc<EntityPositions>,
        observer: Observer,
        radius: f64,
        max_send_count: usize,
        update_interval_ms: u64,
    ) -> Self {
        Self {
            positions,
            observer,
            radius,
            max_send_count,
            update_interval_ms,
            next_update_ms: 0,
            update_ready: false,
            replication_set: ReplicationSet::new(),
        }
    }

    /// Moves the observer; takes effect on the next recomputation.
    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = observer;
        self.next_update_ms = 0;
    }

    pub fn observer(&self) -> Observer {
        self.observer
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn observer_position(&self) -> Option<Vec3> {
        match self.observer {
            Observer::Point(position) => Some(position),
            Observer::Entity(entity) => self.positions.position(entity),
        }
    }

    fn recompute(&mut self) -> ReplicationSet {
        let mut set = ReplicationSet::new();
        let Some(center) = self.observer_position() else {
            return set;
        };

        for entity in self.positions.within_radius(center, self.radius) {
            set.insert(entity, NetEntityRole::Client);
        }
        if let Observer::Entity(controlled) = self.observer {
            set.insert(controlled, NetEntityRole::Autonomous);
        }
        set
    }
}

impl ReplicationWindow for ProximityReplicationWindow {
    fn replication_set_update_ready(&mut self) -> bool {
        std::mem::take(&mut self.update_ready)
    }

    fn replication_set(&self) -> &ReplicationSet {
        &self.replication_set
    }

    fn max_entity_replicator_send_count(&self) -> usize {
        self.max_send_count
    }

    fn is_in_window(&self, entity: NetEntityId) -> Option<NetEntityRole> {
        self.replication_set.get(&entity).copied()
    }

    fn update_window(&mut self, now_ms: u64) {
        if now_ms < self.next_update_ms {
            return;
        }
        self.next_update_ms = now_ms.saturating_add(self.update_interval_ms);

        let set = self.recompute();
        if set != self.replication_set {
            trace!(
                "🔭 Proximity window changed: {} -> {} entities",
                self.replication_set.len(),
                set.len()
            );
            self.replication_set = set;
            self.update_ready = true;
        }
    }

    fn debug_draw(&self) {
        debug!(
            "🔭 Proximity window: observer={:?} radius={:.1} entities={} budget={}",
            self.observer,
            self.radius,
            self.replication_set.len(),
            self.max_send_count
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world() -> Arc<EntityPositions> {
        let positions = Arc::new(EntityPositions::new());
        positions.set_position(NetEntityId::new(1), Vec3::new(0.0, 0.0, 0.0));
        positions.set_position(NetEntityId::new(2), Vec3::new(10.0, 0.0, 0.0));
        positions.set_position(NetEntityId::new(3), Vec3::new(500.0, 0.0, 0.0));
        positions
    }

    #[test]
    fn test_entities_within_radius_are_in_window() {
        let mut window = ProximityReplicationWindow::new(world(), Observer::Point(Vec3::zero()), 50.0, 8, 0);
        window.update_window(0);

        assert!(window.replication_set_update_ready());
        assert_eq!(window.replication_set().len(), 2);
        assert_eq!(window.is_in_window(NetEntityId::new(2)), Some(NetEntityRole::Client));
        assert_eq!(window.is_in_window(NetEntityId::new(3)), None);
        assert_eq!(window.max_entity_replicator_send_count(), 8);
    }

    #[test]
    fn test_observer_entity_is_autonomous() {
        let positions = world();
        let mut window = ProximityReplicationWindow::new(
            positions.clone(),
            Observer::Entity(NetEntityId::new(3)),
            50.0,
            8,
            0,
        );
        window.update_window(0);

        assert_eq!(window.is_in_window(NetEntityId::new(3)), Some(NetEntityRole::Autonomous));
        assert_eq!(window.is_in_window(NetEntityId::new(1)), None);

        positions.set_position(NetEntityId::new(3), Vec3::new(5.0, 0.0, 0.0));
        window.update_window(1);
        assert_eq!(window.replication_set().len(), 3);
    }

    #[test]
    fn test_recomputation_is_throttled() {
        let positions = world();
        let mut window = ProximityReplicationWindow::new(positions.clone(), Observer::Point(Vec3::zero()), 50.0, 8, 100);

        window.update_window(0);
        assert!(window.replication_set_update_ready());
        // Readiness is consumed once reported.
        assert!(!window.replication_set_update_ready());

        positions.remove(NetEntityId::new(2));
        window.update_window(50);
        assert!(!window.replication_set_update_ready());
        assert!(window.is_in_window(NetEntityId::new(2)).is_some());

        window.update_window(100);
        assert!(window.replication_set_update_ready());
        assert!(window.is_in_window(NetEntityId::new(2)).is_none());
    }
}
