use crate::store::component::{
    ComponentBatch, EntityId, EntitySnapshot, MetadataEntry, MetadataValue, StoreChange,
    WorldSnapshot, INTERACTABLE, METADATA_ACTION, OBJECT3D, TRANSFORM,
};
use crate::store::StoreError;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Default)]
struct StoreInner {
    next_entity: u64,
    entities: BTreeMap<EntityId, BTreeMap<String, Value>>,
    metadata: BTreeMap<String, MetadataEntry>,
}

impl StoreInner {
    fn components_mut(
        &mut self,
        entity: EntityId,
    ) -> Result<&mut BTreeMap<String, Value>, StoreError> {
        self.entities
            .get_mut(&entity)
            .ok_or(StoreError::EntityNotFound(entity.0))
    }

    fn check_metadata_author(&self, key: &str, author: &str) -> Result<(), StoreError> {
        match self.metadata.get(key) {
            Some(entry) if entry.author != author => Err(StoreError::MetadataConflict {
                key: key.to_string(),
                owner: entry.author.clone(),
            }),
            _ => Ok(()),
        }
    }
}

/// Entity/component store for one world instance.
///
/// All mutations take the write lock, so a snapshot (read lock) never sees a
/// batch half-applied. Change notifications are sent while the lock is held,
/// which keeps the broadcast order identical to the mutation order.
pub struct EntityStore {
    inner: RwLock<StoreInner>,
    changes_tx: broadcast::Sender<StoreChange>,
}

impl EntityStore {
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(StoreInner::default()),
            changes_tx,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine
        let _ = self.changes_tx.send(change);
    }

    /// Create an entity with no components
    pub fn add_entity(&self) -> EntityId {
        let mut inner = self.write();
        let entity = EntityId(inner.next_entity);
        inner.next_entity += 1;
        inner.entities.insert(entity, BTreeMap::new());

        self.publish(StoreChange::EntitySpawned {
            entity,
            components: BTreeMap::new(),
        });
        entity
    }

    /// Create an entity and attach a batch of components in one step.
    ///
    /// The batch is rejected as a whole if it names a kind twice.
    pub fn spawn(&self, components: ComponentBatch) -> Result<EntityId, StoreError> {
        let mut inner = self.write();
        let entity = EntityId(inner.next_entity);

        let mut seen = HashSet::new();
        for (kind, _) in &components {
            if !seen.insert(kind.as_str()) {
                return Err(StoreError::DuplicateComponent {
                    entity: entity.0,
                    kind: kind.clone(),
                });
            }
        }

        inner.next_entity += 1;
        let components: BTreeMap<String, Value> = components.into_iter().collect();
        inner.entities.insert(entity, components.clone());

        debug!(entity = %entity, components = components.len(), "Entity spawned");
        self.publish(StoreChange::EntitySpawned { entity, components });
        Ok(entity)
    }

    /// Remove an entity together with all of its components
    pub fn remove_entity(&self, entity: EntityId) -> Result<BTreeMap<String, Value>, StoreError> {
        let mut inner = self.write();
        let removed = inner
            .entities
            .remove(&entity)
            .ok_or(StoreError::EntityNotFound(entity.0))?;

        debug!(entity = %entity, "Entity removed");
        self.publish(StoreChange::EntityRemoved { entity });
        Ok(removed)
    }

    /// Attach a component. A kind the entity already carries is rejected
    /// with `DuplicateComponent`; use `set_component` to overwrite.
    pub fn add_component(&self, entity: EntityId, kind: &str, data: Value) -> Result<(), StoreError> {
        self.add_components(entity, vec![(kind.to_string(), data)])
    }

    /// Attach several components atomically: all are added or none are
    pub fn add_components(&self, entity: EntityId, batch: ComponentBatch) -> Result<(), StoreError> {
        let mut inner = self.write();
        let components = inner.components_mut(entity)?;

        let mut seen = HashSet::new();
        for (kind, _) in &batch {
            if components.contains_key(kind) || !seen.insert(kind.as_str()) {
                warn!(entity = %entity, kind = %kind, "Rejected duplicate component");
                return Err(StoreError::DuplicateComponent {
                    entity: entity.0,
                    kind: kind.clone(),
                });
            }
        }

        for (kind, data) in batch {
            components.insert(kind.clone(), data.clone());
            self.publish(StoreChange::ComponentAdded { entity, kind, data });
        }
        Ok(())
    }

    /// Insert or overwrite a component, returning the previous value
    pub fn set_component(
        &self,
        entity: EntityId,
        kind: &str,
        data: Value,
    ) -> Result<Option<Value>, StoreError> {
        let mut inner = self.write();
        let components = inner.components_mut(entity)?;
        let old_value = components.insert(kind.to_string(), data.clone());

        self.publish(StoreChange::ComponentSet {
            entity,
            kind: kind.to_string(),
            old_value: old_value.clone(),
            data,
        });
        Ok(old_value)
    }

    pub fn remove_component(&self, entity: EntityId, kind: &str) -> Result<Value, StoreError> {
        let mut inner = self.write();
        let removed = inner
            .components_mut(entity)?
            .remove(kind)
            .ok_or_else(|| StoreError::ComponentNotFound {
                entity: entity.0,
                kind: kind.to_string(),
            })?;

        self.publish(StoreChange::ComponentRemoved {
            entity,
            kind: kind.to_string(),
        });
        Ok(removed)
    }

    pub fn get_component(&self, entity: EntityId, kind: &str) -> Option<Value> {
        self.read()
            .entities
            .get(&entity)
            .and_then(|components| components.get(kind).cloned())
    }

    pub fn has_component(&self, entity: EntityId, kind: &str) -> bool {
        self.read()
            .entities
            .get(&entity)
            .map(|components| components.contains_key(kind))
            .unwrap_or(false)
    }

    pub fn contains_entity(&self, entity: EntityId) -> bool {
        self.read().entities.contains_key(&entity)
    }

    pub fn entity_count(&self) -> usize {
        self.read().entities.len()
    }

    pub fn get_metadata(&self, key: &str) -> Option<MetadataValue> {
        self.read().metadata.get(key).map(|entry| entry.value.clone())
    }

    /// Write a metadata entry on behalf of `author`.
    ///
    /// A key is write-once per author: the author that created it may
    /// overwrite it, anyone else gets `MetadataConflict`.
    pub fn set_metadata(
        &self,
        key: &str,
        value: MetadataValue,
        author: &str,
    ) -> Result<Option<MetadataValue>, StoreError> {
        let mut inner = self.write();
        inner.check_metadata_author(key, author)?;

        let previous = inner.metadata.insert(
            key.to_string(),
            MetadataEntry {
                value: value.clone(),
                author: author.to_string(),
            },
        );

        self.publish(StoreChange::MetadataSet {
            key: key.to_string(),
            value,
        });
        Ok(previous.map(|entry| entry.value))
    }

    /// Record the entity's transform position under `key` as `"x,y,z"`
    pub fn record_position_metadata(
        &self,
        entity: EntityId,
        key: &str,
        author: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.write();
        let position = derive_position(&inner, entity)?;
        inner.check_metadata_author(key, author)?;
        self.write_metadata(&mut inner, key, &position, author);
        Ok(position)
    }

    /// Author a scene-level metadata marker on an entity: records its
    /// position under `key` and attaches object3d and interactable
    /// components pointing back at the key, in one step.
    pub fn attach_world_metadata(
        &self,
        entity: EntityId,
        key: &str,
        author: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.write();
        let position = derive_position(&inner, entity)?;
        inner.check_metadata_author(key, author)?;
        let components = inner.components_mut(entity)?;
        for kind in [OBJECT3D, INTERACTABLE] {
            if components.contains_key(kind) {
                return Err(StoreError::DuplicateComponent {
                    entity: entity.0,
                    kind: kind.to_string(),
                });
            }
        }

        self.write_metadata(&mut inner, key, &position, author);

        let markers = [
            (OBJECT3D, json!({ "_data": key })),
            (
                INTERACTABLE,
                json!({
                    "action": METADATA_ACTION,
                    "interactionUserData": key,
                }),
            ),
        ];
        for (kind, data) in markers {
            inner
                .components_mut(entity)?
                .insert(kind.to_string(), data.clone());
            self.publish(StoreChange::ComponentAdded {
                entity,
                kind: kind.to_string(),
                data,
            });
        }

        Ok(position)
    }

    fn write_metadata(&self, inner: &mut StoreInner, key: &str, position: &str, author: &str) {
        let value = MetadataValue::String(position.to_string());
        inner.metadata.insert(
            key.to_string(),
            MetadataEntry {
                value: value.clone(),
                author: author.to_string(),
            },
        );
        self.publish(StoreChange::MetadataSet {
            key: key.to_string(),
            value,
        });
    }

    /// Consistent point-in-time view of every entity and the metadata map
    pub fn snapshot(&self) -> WorldSnapshot {
        build_snapshot(&self.read())
    }

    /// Snapshot plus a change receiver positioned right after it, so a newly
    /// joined session neither misses nor double-applies a change.
    pub fn snapshot_and_subscribe(&self) -> (WorldSnapshot, broadcast::Receiver<StoreChange>) {
        let inner = self.read();
        let rx = self.changes_tx.subscribe();
        (build_snapshot(&inner), rx)
    }

    /// Subscribe to store changes
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes_tx.subscribe()
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn build_snapshot(inner: &StoreInner) -> WorldSnapshot {
    WorldSnapshot {
        entities: inner
            .entities
            .iter()
            .map(|(id, components)| EntitySnapshot {
                id: *id,
                components: components.clone(),
            })
            .collect(),
        metadata: inner
            .metadata
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect(),
        taken_at: Utc::now(),
    }
}

fn derive_position(inner: &StoreInner, entity: EntityId) -> Result<String, StoreError> {
    let components = inner
        .entities
        .get(&entity)
        .ok_or(StoreError::EntityNotFound(entity.0))?;
    components
        .get(TRANSFORM)
        .and_then(format_position)
        .ok_or(StoreError::PositionUnavailable(entity.0))
}

/// Serialize a transform's position as `"x,y,z"`.
///
/// Accepts `{"position": {"x":..,"y":..,"z":..}}` or `{"position": [x, y, z]}`.
pub(crate) fn format_position(transform: &Value) -> Option<String> {
    let position = transform.get("position")?;
    let (x, y, z) = match position {
        Value::Array(axes) if axes.len() == 3 => {
            (axes[0].as_f64()?, axes[1].as_f64()?, axes[2].as_f64()?)
        }
        Value::Object(_) => (
            position.get("x")?.as_f64()?,
            position.get("y")?.as_f64()?,
            position.get("z")?.as_f64()?,
        ),
        _ => return None,
    };
    Some(format!("{},{},{}", x, y, z))
}
