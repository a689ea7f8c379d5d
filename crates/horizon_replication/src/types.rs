//! # Core Replication Types
//!
//! Identifiers and small value types shared by every layer of the replication
//! stack: the windows that decide relevance, the replicators that track what a
//! peer knows, and the wire messages that carry state between hosts.
//!
//! ## Key Types
//!
//! - [`NetEntityId`] - Opaque, ordered handle for a networked entity
//! - [`NetEntityRole`] - The role the remote side plays for an entity
//! - [`StateVersion`] - Monotonic version of an entity's serialized state
//! - [`Vec3`] - Double precision position used by proximity windows

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic version of an entity's replicated state.
///
/// Version `0` always means "empty state"; a delta encoded since version `0`
/// carries the full snapshot.
pub type StateVersion = u64;

/// Version marker for an empty state.
pub const EMPTY_STATE_VERSION: StateVersion = 0;

/// Unique network identifier for a replicated entity.
///
/// The replication layer never interprets the value; it is only compared,
/// hashed and ordered. Ordering is what lets replication sets be reconciled
/// against live replicators in a single sorted pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetEntityId(pub u64);

impl NetEntityId {
    /// Creates a new entity id from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NetEntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity#{}", self.0)
    }
}

impl From<u64> for NetEntityId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// The role a host plays for a networked entity.
///
/// Replication windows report the role the *remote* peer should assume for
/// each entity in its set. A server replicating a player's own pawn to that
/// player reports [`NetEntityRole::Autonomous`]; every other proxy is
/// [`NetEntityRole::Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetEntityRole {
    /// No valid role; never replicated
    InvalidRole,
    /// A simulated proxy with no local control
    Client,
    /// A proxy the remote peer controls locally and may push updates for
    Autonomous,
    /// A server-side copy owned by another server
    Server,
    /// The authoritative owner of the entity
    Authority,
}

impl NetEntityRole {
    /// Whether this role may be replicated at all.
    pub fn is_valid(&self) -> bool {
        !matches!(self, NetEntityRole::InvalidRole)
    }
}

impl fmt::Display for NetEntityRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NetEntityRole::InvalidRole => "InvalidRole",
            NetEntityRole::Client => "Client",
            NetEntityRole::Autonomous => "Autonomous",
            NetEntityRole::Server => "Server",
            NetEntityRole::Authority => "Authority",
        };
        f.write_str(name)
    }
}

/// 3D vector with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    /// Squared euclidean distance, cheap enough for per-tick window checks.
    pub fn distance_squared(&self, other: Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }

    pub fn distance(&self, other: Vec3) -> f64 {
        self.distance_squared(other).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_id_ordering_and_display() {
        let a = NetEntityId::new(3);
        let b = NetEntityId::from(7);
        assert!(a < b);
        assert_eq!(b.raw(), 7);
        assert_eq!(a.to_string(), "entity#3");
    }

    #[test]
    fn test_role_validity() {
        assert!(!NetEntityRole::InvalidRole.is_valid());
        assert!(NetEntityRole::Autonomous.is_valid());
        assert_eq!(NetEntityRole::Client.to_string(), "Client");
    }

    #[test]
    fn test_vec3_distance() {
        let origin = Vec3::zero();
        let point = Vec3::new(3.0, 4.0, 0.0);
        assert_eq!(origin.distance_squared(point), 25.0);
        assert_eq!(point.distance(origin), 5.0);
    }
}
