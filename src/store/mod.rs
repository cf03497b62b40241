// Entity/component store and world metadata

mod component;
mod engine;

pub use component::{
    ComponentBatch, EntityId, EntitySnapshot, MetadataEntry, MetadataValue, StoreChange,
    WorldSnapshot, INTERACTABLE, METADATA_ACTION, OBJECT3D, TRANSFORM,
};
pub use engine::EntityStore;

use thiserror::Error;

/// Store policy violations raised by the simulation layer
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("entity {entity} already has a '{kind}' component")]
    DuplicateComponent { entity: u64, kind: String },

    #[error("entity {0} not found")]
    EntityNotFound(u64),

    #[error("entity {entity} has no '{kind}' component")]
    ComponentNotFound { entity: u64, kind: String },

    /// Metadata key was authored by a different writer
    #[error("metadata key '{key}' is owned by '{owner}'")]
    MetadataConflict { key: String, owner: String },

    /// Entity has no transform position to derive a metadata value from
    #[error("entity {0} has no readable transform position")]
    PositionUnavailable(u64),
}

#[cfg(test)]
mod tests;
