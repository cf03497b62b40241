use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Component kind carrying spatial data (`position`, `rotation`, `scale`)
pub const TRANSFORM: &str = "transform";

/// Component kind attached alongside authored world metadata
pub const INTERACTABLE: &str = "interactable";

/// Scene object component; metadata markers store their key under `_data`
pub const OBJECT3D: &str = "object3d";

/// Interaction action recorded on metadata-bearing entities
pub const METADATA_ACTION: &str = "_metadata";

/// Entity identifier, unique within one world instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Components applied together in one logical operation
pub type ComponentBatch = Vec<(String, Value)>;

/// World metadata value (closed set of primitives)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// Metadata value plus the authoring path that wrote it
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataEntry {
    pub value: MetadataValue,
    pub author: String,
}

/// Entity with all of its components at snapshot time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub components: BTreeMap<String, Value>,
}

/// Point-in-time view of a world instance's store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub entities: Vec<EntitySnapshot>,
    pub metadata: BTreeMap<String, MetadataValue>,
    pub taken_at: DateTime<Utc>,
}

impl WorldSnapshot {
    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.metadata.is_empty()
    }
}

/// Store mutation broadcast to sessions bound to the world
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StoreChange {
    EntitySpawned {
        entity: EntityId,
        components: BTreeMap<String, Value>,
    },
    EntityRemoved {
        entity: EntityId,
    },
    ComponentAdded {
        entity: EntityId,
        kind: String,
        data: Value,
    },
    ComponentSet {
        entity: EntityId,
        kind: String,
        old_value: Option<Value>,
        data: Value,
    },
    ComponentRemoved {
        entity: EntityId,
        kind: String,
    },
    MetadataSet {
        key: String,
        value: MetadataValue,
    },
}
