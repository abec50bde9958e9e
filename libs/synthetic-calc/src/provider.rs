//! Collaborator interfaces and the in-memory entity store
//!
//! The engine never owns live data. It reads values, registry metadata and
//! metadata-function properties through the traits below.
//!
//! Implementations:
//! - `MemoryEntityStore`: DashMap-backed store for testing and embedding

use crate::value::Value;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of live values
pub trait LiveValueProvider: Send + Sync {
    /// Current value of an identifier, `None` when absent
    fn get_value(&self, id: &str) -> Option<Value>;

    /// Named attribute of an identifier
    fn get_attribute(&self, _id: &str, _attribute: &str) -> Option<Value> {
        None
    }
}

/// Registry metadata used for collection matching
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    #[serde(default)]
    pub device_class: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl EntityMetadata {
    pub fn with_device_class(mut self, device_class: impl Into<String>) -> Self {
        self.device_class = Some(device_class.into());
        self
    }

    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.labels.insert(label.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

/// Registry of known identifiers
pub trait EntityRegistry: Send + Sync {
    /// All known identifiers
    fn entity_ids(&self) -> Vec<String>;

    /// Registry metadata for one identifier
    fn metadata(&self, id: &str) -> Option<EntityMetadata>;
}

/// Properties read by metadata functions (`last_changed`, `area`, ...)
pub trait MetadataProvider: Send + Sync {
    fn metadata_value(&self, id: &str, key: &str) -> Option<Value>;
}

#[derive(Debug, Clone)]
struct EntityRecord {
    state: Value,
    attributes: HashMap<String, Value>,
    metadata: EntityMetadata,
    last_changed: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

impl EntityRecord {
    fn new(state: Value, at: DateTime<Utc>) -> Self {
        Self {
            state,
            attributes: HashMap::new(),
            metadata: EntityMetadata::default(),
            last_changed: at,
            last_updated: at,
        }
    }
}

/// In-memory entity store with concurrent access
///
/// Every mutation bumps a snapshot version that can be used as a cache key.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    entities: DashMap<String, EntityRecord>,
    version: AtomicU64,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot version
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    fn bump(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Set the state of an entity, creating it if needed. Returns the new version.
    pub fn set_state(&self, id: &str, state: impl Into<Value>) -> u64 {
        self.set_state_at(id, state, Utc::now())
    }

    /// Set the state with an explicit timestamp.
    ///
    /// `last_changed` only moves when the state value actually changes.
    pub fn set_state_at(&self, id: &str, state: impl Into<Value>, at: DateTime<Utc>) -> u64 {
        let state = state.into();
        self.entities
            .entry(id.to_string())
            .and_modify(|record| {
                if record.state != state {
                    record.last_changed = at;
                }
                record.last_updated = at;
                record.state = state.clone();
            })
            .or_insert_with(|| EntityRecord::new(state.clone(), at));
        self.bump()
    }

    pub fn set_attribute(&self, id: &str, attribute: &str, value: impl Into<Value>) -> u64 {
        let value = value.into();
        self.entities
            .entry(id.to_string())
            .or_insert_with(|| EntityRecord::new(Value::Null, Utc::now()))
            .attributes
            .insert(attribute.to_string(), value);
        self.bump()
    }

    pub fn set_metadata(&self, id: &str, metadata: EntityMetadata) -> u64 {
        self.entities
            .entry(id.to_string())
            .or_insert_with(|| EntityRecord::new(Value::Null, Utc::now()))
            .metadata = metadata;
        self.bump()
    }

    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entities.remove(id).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        self.entities.clear();
        self.bump();
    }
}

impl LiveValueProvider for MemoryEntityStore {
    fn get_value(&self, id: &str) -> Option<Value> {
        self.entities.get(id).map(|record| record.state.clone())
    }

    fn get_attribute(&self, id: &str, attribute: &str) -> Option<Value> {
        self.entities
            .get(id)
            .and_then(|record| record.attributes.get(attribute).cloned())
    }
}

impl EntityRegistry for MemoryEntityStore {
    fn entity_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entities.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn metadata(&self, id: &str) -> Option<EntityMetadata> {
        self.entities.get(id).map(|record| record.metadata.clone())
    }
}

impl MetadataProvider for MemoryEntityStore {
    fn metadata_value(&self, id: &str, key: &str) -> Option<Value> {
        let record = self.entities.get(id)?;
        let string_list =
            |items: &BTreeSet<String>| Value::List(items.iter().cloned().map(Value::from).collect());

        match key {
            "entity_id" => Some(Value::from(id)),
            "state" => Some(record.state.clone()),
            "last_changed" => Some(Value::DateTime(record.last_changed.fixed_offset())),
            "last_updated" => Some(Value::DateTime(record.last_updated.fixed_offset())),
            "device_class" => record.metadata.device_class.clone().map(Value::from),
            "area" => record.metadata.area.clone().map(Value::from),
            "labels" => Some(string_list(&record.metadata.labels)),
            "tags" => Some(string_list(&record.metadata.tags)),
            other => record.attributes.get(other).cloned(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_and_attributes() {
        let store = MemoryEntityStore::new();
        store.set_state("sensor.power", 1500.0);
        store.set_attribute("sensor.power", "unit", "W");

        assert_eq!(store.get_value("sensor.power"), Some(Value::Float(1500.0)));
        assert_eq!(
            store.get_attribute("sensor.power", "unit"),
            Some(Value::from("W"))
        );
        assert_eq!(store.get_value("sensor.missing"), None);
    }

    #[test]
    fn test_version_bumps_on_mutation() {
        let store = MemoryEntityStore::new();
        let v0 = store.version();
        let v1 = store.set_state("sensor.a", 1.0);
        let v2 = store.set_metadata("sensor.a", EntityMetadata::default().with_area("kitchen"));
        assert!(v0 < v1 && v1 < v2);
        assert_eq!(store.version(), v2);
        assert!(store.remove("sensor.a"));
        assert!(!store.remove("sensor.a"));
    }

    #[test]
    fn test_entity_ids_sorted() {
        let store = MemoryEntityStore::new();
        store.set_state("sensor.b", 1.0);
        store.set_state("sensor.a", 1.0);
        assert_eq!(store.entity_ids(), vec!["sensor.a", "sensor.b"]);
    }

    #[test]
    fn test_last_changed_only_moves_on_change() {
        let store = MemoryEntityStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 15, 11, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap();

        store.set_state_at("switch.pump", "on", t0);
        store.set_state_at("switch.pump", "on", t1);
        assert_eq!(
            store.metadata_value("switch.pump", "last_changed"),
            Some(Value::DateTime(t0.fixed_offset()))
        );
        assert_eq!(
            store.metadata_value("switch.pump", "last_updated"),
            Some(Value::DateTime(t1.fixed_offset()))
        );

        store.set_state_at("switch.pump", "off", t2);
        assert_eq!(
            store.metadata_value("switch.pump", "last_changed"),
            Some(Value::DateTime(t2.fixed_offset()))
        );
    }

    #[test]
    fn test_metadata_values() {
        let store = MemoryEntityStore::new();
        store.set_state("binary_sensor.door", "off");
        store.set_metadata(
            "binary_sensor.door",
            EntityMetadata::default()
                .with_device_class("door")
                .with_label("security"),
        );

        assert_eq!(
            store.metadata_value("binary_sensor.door", "device_class"),
            Some(Value::from("door"))
        );
        assert_eq!(
            store.metadata_value("binary_sensor.door", "labels"),
            Some(Value::List(vec![Value::from("security")]))
        );
        assert_eq!(store.metadata_value("binary_sensor.door", "area"), None);
        assert_eq!(store.metadata_value("binary_sensor.none", "area"), None);
    }
}
