use crate::config::WorldConfig;
use crate::error::{HostError, HostResult};
use crate::session::SessionId;
use crate::store::WorldSnapshot;
use crate::world::instance::{WorldHandle, WorldInstance, WorldStatus, WorldSummary};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Registry notification
#[derive(Clone, Debug, PartialEq)]
pub enum WorldEvent {
    InstanceCreated { world: String },
    InstanceDestroyed { world: String },
    SessionJoined { world: String, session: SessionId },
    SessionLeft { world: String, session: SessionId },
}

/// Maps world keys to running instances and sessions to the instance they
/// are bound to.
///
/// Instance creation goes through the `instances` map entry, so concurrent
/// binds for an unseen key serialize on that shard and attach to the same
/// instance. Lock order is always `bindings` before `instances`.
pub struct WorldRegistry {
    /// world key -> instance
    instances: Arc<DashMap<String, Arc<WorldInstance>>>,
    /// session id -> bound instance
    bindings: DashMap<SessionId, Arc<WorldInstance>>,
    /// Closed until allocation in managed mode, and again once draining
    accepting: AtomicBool,
    config: WorldConfig,
    events_tx: broadcast::Sender<WorldEvent>,
}

impl WorldRegistry {
    /// Create a registry; `accepting` controls whether binds are allowed yet
    pub fn new(config: WorldConfig, accepting: bool) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            instances: Arc::new(DashMap::new()),
            bindings: DashMap::new(),
            accepting: AtomicBool::new(accepting),
            config,
            events_tx,
        }
    }

    /// Create the configured persistent worlds
    pub fn preload(&self) {
        for key in self.config.preload.clone() {
            self.precreate(&key);
        }
    }

    /// Create a persistent world ahead of any session
    pub fn precreate(&self, key: &str) -> WorldHandle {
        let mut created = false;
        let instance = {
            let entry = self.instances.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(WorldInstance::new(key, true))
            });
            Arc::clone(entry.value())
        };

        if created {
            self.on_created(&instance);
        }
        WorldHandle(instance)
    }

    fn on_created(&self, instance: &Arc<WorldInstance>) {
        instance.set_status(WorldStatus::Running);
        info!(
            world = %instance.key(),
            instance_id = %instance.id(),
            persistent = instance.is_persistent(),
            "World instance created"
        );
        let _ = self.events_tx.send(WorldEvent::InstanceCreated {
            world: instance.key().to_string(),
        });
    }

    /// Bind a session to the world named `key`, creating it if needed.
    ///
    /// Binding the same session to the same world again returns the existing
    /// handle; binding it to a different world is an invariant violation.
    pub fn bind(&self, session: &SessionId, key: &str) -> HostResult<WorldHandle> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(HostError::InstanceUnavailable(
                "host is not accepting sessions".to_string(),
            ));
        }

        let binding = match self.bindings.entry(session.clone()) {
            Entry::Occupied(existing) => {
                let bound = existing.get();
                if bound.key() == key && bound.status() != WorldStatus::Destroyed {
                    return Ok(WorldHandle(Arc::clone(bound)));
                }
                error!(
                    session_id = %session,
                    bound_world = %bound.key(),
                    requested_world = %key,
                    "Session already bound to another world"
                );
                return Err(HostError::InvariantViolation(format!(
                    "session {} is bound to '{}' and cannot bind to '{}'",
                    session,
                    bound.key(),
                    key
                )));
            }
            Entry::Vacant(vacant) => vacant,
        };

        let mut created = false;
        let instance = {
            let entry = self.instances.entry(key.to_string()).or_insert_with(|| {
                created = true;
                Arc::new(WorldInstance::new(key, false))
            });
            let instance = Arc::clone(entry.value());

            match instance.status() {
                WorldStatus::Draining | WorldStatus::Destroyed => {
                    return Err(HostError::InstanceUnavailable(format!(
                        "world '{}' is {:?}",
                        key,
                        instance.status()
                    )));
                }
                WorldStatus::Initializing | WorldStatus::Running => {}
            }

            if let Some(max) = self.config.max_sessions_per_world {
                if instance.session_count() >= max {
                    return Err(HostError::InstanceUnavailable(format!(
                        "world '{}' is full ({} sessions)",
                        key, max
                    )));
                }
            }

            // Added under the shard lock so a racing teardown sees the member
            instance.add_member(session);
            instance
        };

        if created {
            self.on_created(&instance);
        }

        binding.insert(Arc::clone(&instance));
        debug!(session_id = %session, world = %key, "Session bound");
        Ok(WorldHandle(instance))
    }

    /// Announce the session's join to observers. Only the first call for a
    /// binding has an effect; returns whether it did.
    pub fn mark_joined(&self, session: &SessionId) -> bool {
        let Some(instance) = self.bindings.get(session).map(|b| Arc::clone(b.value())) else {
            return false;
        };
        if !instance.announce_join(session) {
            return false;
        }

        info!(session_id = %session, world = %instance.key(), "Session joined world");
        let _ = self.events_tx.send(WorldEvent::SessionJoined {
            world: instance.key().to_string(),
            session: session.clone(),
        });
        true
    }

    /// Remove a session from its world. Idempotent: unknown sessions are a
    /// no-op. Empty non-persistent worlds are torn down after the grace period.
    pub fn unbind(&self, session: &SessionId) -> Option<WorldHandle> {
        let (_, instance) = self.bindings.remove(session)?;

        if let Some(true) = instance.remove_member(session) {
            info!(session_id = %session, world = %instance.key(), "Session left world");
            let _ = self.events_tx.send(WorldEvent::SessionLeft {
                world: instance.key().to_string(),
                session: session.clone(),
            });
        }

        if instance.is_empty()
            && !instance.is_persistent()
            && instance.status() == WorldStatus::Running
        {
            self.schedule_teardown(Arc::clone(&instance));
        }

        Some(WorldHandle(instance))
    }

    fn schedule_teardown(&self, instance: Arc<WorldInstance>) {
        let instances = Arc::clone(&self.instances);
        let events_tx = self.events_tx.clone();
        let grace = self.config.teardown_grace();

        if grace.is_zero() {
            teardown_if_idle(&instances, &events_tx, &instance);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(
                    world = %instance.key(),
                    grace_ms = grace.as_millis() as u64,
                    "World teardown scheduled"
                );
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    teardown_if_idle(&instances, &events_tx, &instance);
                });
            }
            Err(_) => {
                warn!(world = %instance.key(), "No runtime for delayed teardown, leaving world in place");
            }
        }
    }

    /// Consistent snapshot of the named world's store
    pub fn snapshot(&self, key: &str) -> HostResult<WorldSnapshot> {
        self.get(key)
            .map(|handle| handle.snapshot())
            .ok_or_else(|| HostError::InstanceUnavailable(format!("world '{}' not found", key)))
    }

    pub fn get(&self, key: &str) -> Option<WorldHandle> {
        self.instances
            .get(key)
            .map(|instance| WorldHandle(Arc::clone(instance.value())))
    }

    /// World the session is currently bound to
    pub fn world_of(&self, session: &SessionId) -> Option<WorldHandle> {
        self.bindings
            .get(session)
            .map(|instance| WorldHandle(Arc::clone(instance.value())))
    }

    /// Tear a world down now, returning the sessions that were bound to it
    pub fn recycle(&self, key: &str) -> Vec<SessionId> {
        let Some((_, instance)) = self.instances.remove(key) else {
            return Vec::new();
        };
        self.destroy(&instance)
    }

    fn destroy(&self, instance: &Arc<WorldInstance>) -> Vec<SessionId> {
        instance.set_status(WorldStatus::Destroyed);

        let mut sessions = Vec::new();
        for (session, joined) in instance.drain_members() {
            self.bindings.remove(&session);
            if joined {
                let _ = self.events_tx.send(WorldEvent::SessionLeft {
                    world: instance.key().to_string(),
                    session: session.clone(),
                });
            }
            sessions.push(session);
        }

        info!(
            world = %instance.key(),
            instance_id = %instance.id(),
            sessions = sessions.len(),
            "World instance destroyed"
        );
        let _ = self.events_tx.send(WorldEvent::InstanceDestroyed {
            world: instance.key().to_string(),
        });
        sessions
    }

    /// Allow binds (allocation in managed mode)
    pub fn open_for_binds(&self) {
        self.accepting.store(true, Ordering::SeqCst);
        info!("World registry accepting sessions");
    }

    /// Refuse new binds and mark every instance as draining
    pub fn begin_drain(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        for instance in self.instances.iter() {
            instance.set_status(WorldStatus::Draining);
        }
        info!(worlds = self.instances.len(), "World registry draining");
    }

    /// Destroy every world instance
    pub fn teardown_all(&self) -> Vec<SessionId> {
        let keys: Vec<String> = self.instances.iter().map(|e| e.key().clone()).collect();
        let mut sessions = Vec::new();
        for key in keys {
            sessions.extend(self.recycle(&key));
        }
        sessions
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn world_count(&self) -> usize {
        self.instances.len()
    }

    pub fn bound_session_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn summaries(&self) -> Vec<WorldSummary> {
        let mut summaries: Vec<WorldSummary> =
            self.instances.iter().map(|i| i.value().summary()).collect();
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    /// Subscribe to registry events
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.events_tx.subscribe()
    }
}

/// Remove the instance if it is still the registered one and still empty
fn teardown_if_idle(
    instances: &DashMap<String, Arc<WorldInstance>>,
    events_tx: &broadcast::Sender<WorldEvent>,
    instance: &Arc<WorldInstance>,
) {
    let removed = instances.remove_if(instance.key(), |_, current| {
        Arc::ptr_eq(current, instance) && current.is_empty()
    });

    if removed.is_some() {
        instance.set_status(WorldStatus::Destroyed);
        info!(
            world = %instance.key(),
            instance_id = %instance.id(),
            "Idle world instance torn down"
        );
        let _ = events_tx.send(WorldEvent::InstanceDestroyed {
            world: instance.key().to_string(),
        });
    } else {
        debug!(world = %instance.key(), "World teardown abandoned, instance in use");
    }
}
