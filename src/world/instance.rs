use crate::session::SessionId;
use crate::store::{EntityStore, WorldSnapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use uuid::Uuid;

/// Lifecycle status of one world instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorldStatus {
    Initializing,
    Running,
    Draining,
    Destroyed,
}

/// One running simulation: its bound sessions and its entity store
pub struct WorldInstance {
    key: String,
    id: Uuid,
    persistent: bool,
    created_at: DateTime<Utc>,
    status: RwLock<WorldStatus>,
    /// session id -> join announced
    members: Mutex<HashMap<SessionId, bool>>,
    store: EntityStore,
}

impl WorldInstance {
    pub(crate) fn new(key: &str, persistent: bool) -> Self {
        Self {
            key: key.to_string(),
            id: Uuid::new_v4(),
            persistent,
            created_at: Utc::now(),
            status: RwLock::new(WorldStatus::Initializing),
            members: Mutex::new(HashMap::new()),
            store: EntityStore::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn status(&self) -> WorldStatus {
        *self.status.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn set_status(&self, status: WorldStatus) {
        *self.status.write().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn members(&self) -> MutexGuard<'_, HashMap<SessionId, bool>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.members().keys().cloned().collect()
    }

    pub fn session_count(&self) -> usize {
        self.members().len()
    }

    pub fn contains_session(&self, session: &SessionId) -> bool {
        self.members().contains_key(session)
    }

    pub fn is_empty(&self) -> bool {
        self.members().is_empty()
    }

    pub(crate) fn add_member(&self, session: &SessionId) {
        self.members().entry(session.clone()).or_insert(false);
    }

    /// Mark the join as announced; true only the first time
    pub(crate) fn announce_join(&self, session: &SessionId) -> bool {
        match self.members().get_mut(session) {
            Some(joined) if !*joined => {
                *joined = true;
                true
            }
            _ => false,
        }
    }

    /// Remove a member, returning whether its join had been announced
    pub(crate) fn remove_member(&self, session: &SessionId) -> Option<bool> {
        self.members().remove(session)
    }

    /// Remove every member, returning (session, join announced) pairs
    pub(crate) fn drain_members(&self) -> Vec<(SessionId, bool)> {
        self.members().drain().collect()
    }

    pub fn summary(&self) -> WorldSummary {
        WorldSummary {
            key: self.key.clone(),
            id: self.id,
            status: self.status(),
            persistent: self.persistent,
            sessions: self.session_count(),
            entities: self.store.entity_count(),
            created_at: self.created_at,
        }
    }
}

/// Shared handle to a world instance, handed out by `WorldRegistry::bind`
#[derive(Clone)]
pub struct WorldHandle(pub(crate) Arc<WorldInstance>);

impl WorldHandle {
    pub fn snapshot(&self) -> WorldSnapshot {
        self.0.store.snapshot()
    }

    /// True when both handles point at the same instance
    #[cfg(test)]
    pub(crate) fn same_instance(&self, other: &WorldHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for WorldHandle {
    type Target = WorldInstance;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for WorldHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldHandle")
            .field("key", &self.0.key)
            .field("id", &self.0.id)
            .finish()
    }
}

/// Status line for one world instance
#[derive(Clone, Debug, Serialize)]
pub struct WorldSummary {
    pub key: String,
    pub id: Uuid,
    pub status: WorldStatus,
    pub persistent: bool,
    pub sessions: usize,
    pub entities: usize,
    pub created_at: DateTime<Utc>,
}
