//! Entity state serialization.
//!
//! The replication manager never looks inside entity state. It asks an
//! [`EntityStateCodec`] for the current version of an entity, for a delta since
//! a version the peer already has, and to apply deltas received from a peer.
//!
//! [`PropertyStateCodec`] is a concurrent in-memory store of named JSON
//! properties. Every property carries the version at which it last changed, so
//! deltas only contain what moved after the requested version.

use crate::error::CodecError;
use crate::types::{NetEntityId, StateVersion};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Produces and applies entity state deltas.
///
/// Implementations must uphold the round-trip law: applying a delta encoded
/// since [`EMPTY_STATE_VERSION`](crate::types::EMPTY_STATE_VERSION) to an entity with no state reproduces the
/// source snapshot exactly.
pub trait EntityStateCodec: Send + Sync {
    /// Current version of the entity's state, or `None` if the entity is unknown.
    fn current_version(&self, entity: NetEntityId) -> Option<StateVersion>;

    /// Encodes every change made after `since`.
    fn encode_delta(&self, entity: NetEntityId, since: StateVersion) -> Result<Vec<u8>, CodecError>;

    /// Applies a delta received from a peer and returns the local version afterwards.
    fn apply_delta(&self, entity: NetEntityId, delta: &[u8]) -> Result<StateVersion, CodecError>;

    /// Drops all state held for the entity.
    fn remove_entity(&self, entity: NetEntityId);
}

#[derive(Debug, Clone)]
struct VersionedProperty {
    version: StateVersion,
    value: serde_json::Value,
}

#[derive(Debug, Default)]
struct EntityProperties {
    version: StateVersion,
    properties: BTreeMap<String, VersionedProperty>,
}

impl EntityProperties {
    fn set(&mut self, name: String, value: serde_json::Value) -> StateVersion {
        self.version += 1;
        self.properties.insert(
            name,
            VersionedProperty {
                version: self.version,
                value,
            },
        );
        self.version
    }
}

/// Wire shape of a property delta.
#[derive(Debug, Serialize, Deserialize)]
struct PropertyDelta {
    properties: BTreeMap<String, serde_json::Value>,
}

/// In-memory property store implementing [`EntityStateCodec`].
///
/// Safe to share between the game logic that writes properties and the
/// replication managers of every connection.
#[derive(Debug, Default)]
pub struct PropertyStateCodec {
    entities: DashMap<NetEntityId, EntityProperties>,
}

impl PropertyStateCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity with empty state. Returns false if it already exists.
    pub fn spawn_entity(&self, entity: NetEntityId) -> bool {
        if self.entities.contains_key(&entity) {
            return false;
        }
        self.entities.insert(entity, EntityProperties::default());
        true
    }

    /// Sets a property, creating the entity if needed, and returns the new version.
    pub fn set_property(
        &self,
        entity: NetEntityId,
        name: impl Into<String>,
        value: serde_json::Value,
    ) -> StateVersion {
        self.entities
            .entry(entity)
            .or_default()
            .set(name.into(), value)
    }

    pub fn property(&self, entity: NetEntityId, name: &str) -> Option<serde_json::Value> {
        self.entities
            .get(&entity)
            .and_then(|props| props.properties.get(name).map(|p| p.value.clone()))
    }

    /// Returns every property value of the entity.
    pub fn snapshot(&self, entity: NetEntityId) -> Option<BTreeMap<String, serde_json::Value>> {
        self.entities.get(&entity).map(|props| {
            props
                .properties
                .iter()
                .map(|(name, prop)| (name.clone(), prop.value.clone()))
                .collect()
        })
    }

    pub fn contains(&self, entity: NetEntityId) -> bool {
        self.entities.contains_key(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityStateCodec for PropertyStateCodec {
    fn current_version(&self, entity: NetEntityId) -> Option<StateVersion> {
        self.entities.get(&entity).map(|props| props.version)
    }

    fn encode_delta(&self, entity: NetEntityId, since: StateVersion) -> Result<Vec<u8>, CodecError> {
        let props = self
            .entities
            .get(&entity)
            .ok_or(CodecError::UnknownEntity(entity))?;

        let delta = PropertyDelta {
            properties: props
                .properties
                .iter()
                .filter(|(_, prop)| prop.version > since)
                .map(|(name, prop)| (name.clone(), prop.value.clone()))
                .collect(),
        };

        serde_json::to_vec(&delta).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn apply_delta(&self, entity: NetEntityId, delta: &[u8]) -> Result<StateVersion, CodecError> {
        let delta: PropertyDelta =
            serde_json::from_slice(delta).map_err(|e| CodecError::Malformed(e.to_string()))?;

        let mut props = self.entities.entry(entity).or_default();
        for (name, value) in delta.properties {
            props.set(name, value);
        }
        Ok(props.version)
    }

    fn remove_entity(&self, entity: NetEntityId) {
        self.entities.remove(&entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EMPTY_STATE_VERSION;
    use serde_json::json;

    #[test]
    fn test_delta_from_empty_reconstructs_snapshot() {
        let source = PropertyStateCodec::new();
        let target = PropertyStateCodec::new();
        let entity = NetEntityId::new(42);

        source.set_property(entity, "health", json!(100));
        source.set_property(entity, "name", json!("scout"));
        source.set_property(entity, "position", json!({"x": 1.5, "y": -2.0, "z": 0.0}));

        let delta = source.encode_delta(entity, EMPTY_STATE_VERSION).unwrap();
        target.apply_delta(entity, &delta).unwrap();

        assert_eq!(source.snapshot(entity), target.snapshot(entity));
    }

    #[test]
    fn test_delta_only_contains_newer_properties() {
        let codec = PropertyStateCodec::new();
        let entity = NetEntityId::new(1);

        codec.set_property(entity, "health", json!(100));
        let since = codec.set_property(entity, "armor", json!(5));
        codec.set_property(entity, "health", json!(80));

        let delta = codec.encode_delta(entity, since).unwrap();
        let decoded: PropertyDelta = serde_json::from_slice(&delta).unwrap();

        assert_eq!(decoded.properties.len(), 1);
        assert_eq!(decoded.properties.get("health"), Some(&json!(80)));
    }

    #[test]
    fn test_versions_are_monotonic() {
        let codec = PropertyStateCodec::new();
        let entity = NetEntityId::new(9);

        assert_eq!(codec.current_version(entity), None);
        assert!(codec.spawn_entity(entity));
        assert!(!codec.spawn_entity(entity));
        assert_eq!(codec.current_version(entity), Some(EMPTY_STATE_VERSION));

        let first = codec.set_property(entity, "a", json!(1));
        let second = codec.set_property(entity, "b", json!(2));
        assert!(second > first);
        assert_eq!(codec.current_version(entity), Some(second));
    }

    #[test]
    fn test_unknown_and_malformed() {
        let codec = PropertyStateCodec::new();
        let entity = NetEntityId::new(5);

        assert!(matches!(
            codec.encode_delta(entity, 0),
            Err(CodecError::UnknownEntity(id)) if id == entity
        ));
        assert!(matches!(
            codec.apply_delta(entity, b"not json"),
            Err(CodecError::Malformed(_))
        ));

        codec.set_property(entity, "x", json!(true));
        codec.remove_entity(entity);
        assert!(!codec.contains(entity));
        assert!(codec.is_empty());
    }
}
