use crate::error::{HostError, HostResult};
use crate::store::{EntityId, EntityStore, MetadataValue, StoreChange, StoreError, WorldSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Signaling message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
    Join,
    Leave,
    /// Peer payload relayed over the signaling socket
    Data,
    /// Host -> client only
    Error,
}

/// Signaling envelope: `{"type": ..., "sessionId": ..., "body": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(
        rename = "sessionId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub session_id: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl SignalMessage {
    pub fn new(kind: SignalKind, session_id: impl Into<String>, body: Value) -> Self {
        Self {
            kind,
            session_id: Some(session_id.into()),
            body,
        }
    }

    pub fn error(session_id: impl Into<String>, error: &HostError) -> Self {
        Self::new(
            SignalKind::Error,
            session_id,
            json!({ "code": error.close_code(), "error": error.to_string() }),
        )
    }

    pub fn parse(text: &str) -> HostResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| HostError::Protocol(format!("invalid signaling message: {}", e)))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Body of a client `join`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub world: Option<String>,
}

/// Items queued for a signaling socket
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Signal(SignalMessage),
    /// Close the socket with a code and reason
    Close { code: u16, reason: String },
}

/// Simulation request sent by a client over its peer channel
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PeerRequest {
    Spawn {
        #[serde(default)]
        components: BTreeMap<String, Value>,
    },
    Despawn {
        entity: EntityId,
    },
    AddComponent {
        entity: EntityId,
        kind: String,
        data: Value,
    },
    AddComponents {
        entity: EntityId,
        components: BTreeMap<String, Value>,
    },
    SetComponent {
        entity: EntityId,
        kind: String,
        data: Value,
    },
    RemoveComponent {
        entity: EntityId,
        kind: String,
    },
    SetMetadata {
        key: String,
        value: MetadataValue,
    },
    /// Record the entity position under `key` and tag the entity as its marker
    AttachMetadata {
        entity: EntityId,
        key: String,
    },
}

impl PeerRequest {
    /// Apply against the world store on behalf of `author`. Returns the
    /// entity the request created or touched.
    pub fn apply(self, store: &EntityStore, author: &str) -> Result<Option<EntityId>, StoreError> {
        match self {
            PeerRequest::Spawn { components } => {
                store.spawn(components.into_iter().collect()).map(Some)
            }
            PeerRequest::Despawn { entity } => store.remove_entity(entity).map(|_| Some(entity)),
            PeerRequest::AddComponent { entity, kind, data } => store
                .add_component(entity, &kind, data)
                .map(|_| Some(entity)),
            PeerRequest::AddComponents { entity, components } => store
                .add_components(entity, components.into_iter().collect())
                .map(|_| Some(entity)),
            PeerRequest::SetComponent { entity, kind, data } => store
                .set_component(entity, &kind, data)
                .map(|_| Some(entity)),
            PeerRequest::RemoveComponent { entity, kind } => store
                .remove_component(entity, &kind)
                .map(|_| Some(entity)),
            PeerRequest::SetMetadata { key, value } => {
                store.set_metadata(&key, value, author).map(|_| None)
            }
            PeerRequest::AttachMetadata { entity, key } => store
                .attach_world_metadata(entity, &key, author)
                .map(|_| Some(entity)),
        }
    }
}

/// Host -> client frame on the peer channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum PeerFrame {
    /// Full world state, sent every time the channel opens
    Snapshot { snapshot: WorldSnapshot },
    Change { change: StoreChange },
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        entity: Option<EntityId>,
    },
    Rejected { error: String },
}
