use crate::auth::{Authenticator, Credential, Principal};
use crate::config::SessionConfig;
use crate::error::{HostError, HostResult};
use crate::session::peer::{PeerChannel, PeerContext, PeerEvent, PeerNotice, PeerTransport};
use crate::session::protocol::{
    JoinRequest, Outbound, PeerFrame, PeerRequest, SignalKind, SignalMessage,
};
use crate::session::state::{CloseReason, Session, SessionState};
use crate::session::{ConnectionId, SessionId};
use crate::store::StoreChange;
use crate::world::WorldRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Point-in-time view of a session for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub principal: Option<Principal>,
    pub world: Option<String>,
    pub peer_generation: u64,
    pub joined: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Drives every session through handshake, negotiation, reconnect and close.
///
/// Each session sits behind its own async mutex; the manager never holds two
/// session locks at once.
pub struct SessionManager {
    sessions: DashMap<SessionId, Arc<Mutex<Session>>>,
    /// signaling connection -> session it currently carries
    connections: DashMap<ConnectionId, SessionId>,
    registry: Arc<WorldRegistry>,
    authenticator: Arc<dyn Authenticator>,
    transport: Arc<dyn PeerTransport>,
    config: SessionConfig,
    /// World used when a `join` names none
    default_world: Option<String>,
    draining: AtomicBool,
    fatal_tx: broadcast::Sender<HostError>,
    this: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<WorldRegistry>,
        authenticator: Arc<dyn Authenticator>,
        transport: Arc<dyn PeerTransport>,
        config: SessionConfig,
        default_world: Option<String>,
    ) -> Arc<Self> {
        let (fatal_tx, _) = broadcast::channel(16);

        Arc::new_cyclic(|this| Self {
            sessions: DashMap::new(),
            connections: DashMap::new(),
            registry,
            authenticator,
            transport,
            config,
            default_world,
            draining: AtomicBool::new(false),
            fatal_tx,
            this: this.clone(),
        })
    }

    /// Run one session's peer events in order on their own task. The task
    /// ends once the session and every peer link it handed out are dropped.
    fn spawn_peer_worker(&self, id: SessionId, mut events: mpsc::UnboundedReceiver<PeerNotice>) {
        let this = self.this.clone();
        tokio::spawn(async move {
            while let Some(notice) = events.recv().await {
                let Some(manager) = this.upgrade() else {
                    break;
                };
                manager.handle_peer_event(notice).await;
            }
            debug!(session_id = %id, "Peer event worker stopped");
        });
    }

    /// A signaling socket connected. Authenticates, then starts negotiation
    /// if the credential names a world, or resumes the named session.
    pub async fn handle_connect(
        &self,
        connection: ConnectionId,
        credential: Credential,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> SessionId {
        let id = SessionId::generate();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Mutex::new(Session::new(
            id.clone(),
            connection.clone(),
            outbound,
            events_tx,
        )));
        self.spawn_peer_worker(id.clone(), events_rx);
        self.sessions.insert(id.clone(), Arc::clone(&session));
        self.connections.insert(connection.clone(), id.clone());
        debug!(session_id = %id, connection = %connection, "Session connecting");

        let mut s = session.lock().await;
        if let Err(e) = self.authenticate(&mut s, &credential).await {
            warn!(session_id = %id, error = %e, "Session handshake rejected");
            self.close_locked(&mut s, CloseReason::Error(e));
            return id;
        }

        if let Some(target) = &credential.session {
            drop(s);
            self.resume(&id, SessionId::new(target.clone()), credential.world.clone())
                .await;
            return id;
        }

        if let Some(world) = &credential.world {
            if let Err(e) = self.start_negotiation(&mut s, world).await {
                self.fail_locked(&mut s, e);
            }
        }
        id
    }

    async fn authenticate(&self, s: &mut Session, credential: &Credential) -> HostResult<()> {
        s.transition(SessionState::Authenticating)?;
        if self.draining.load(Ordering::SeqCst) {
            return Err(HostError::InstanceUnavailable(
                "host is draining".to_string(),
            ));
        }

        let principal = self.authenticator.authenticate(credential).await?;
        info!(
            session_id = %s.id,
            principal = %principal.id,
            anonymous = principal.anonymous,
            "Session authenticated"
        );
        s.principal = Some(principal);
        Ok(())
    }

    /// Bind to the world and send the host offer
    async fn start_negotiation(&self, s: &mut Session, world_key: &str) -> HostResult<()> {
        if s.state != SessionState::Authenticating {
            return Err(HostError::Protocol(format!(
                "join not expected in state {:?}",
                s.state
            )));
        }

        let handle = self.registry.bind(&s.id, world_key)?;
        s.world = Some(handle);
        s.transition(SessionState::Negotiating)?;

        s.signal(SignalMessage::new(
            SignalKind::Join,
            s.id.as_str(),
            json!({ "world": world_key, "principal": s.principal, "resumed": false }),
        ));
        info!(session_id = %s.id, world = %world_key, "Session negotiating");

        self.open_peer_channel(s).await
    }

    /// Create a fresh peer channel generation and send its offer
    async fn open_peer_channel(&self, s: &mut Session) -> HostResult<()> {
        let signaling = s
            .outbound
            .clone()
            .ok_or_else(|| HostError::Transport("no signaling connection".to_string()))?;

        s.release_peer();
        s.peer_generation += 1;
        let generation = s.peer_generation;

        let ctx = PeerContext {
            session_id: s.id.clone(),
            generation,
            events: s.peer_events.clone(),
            signaling,
        };
        let link = self.transport.open(ctx).await?;
        let mut channel = PeerChannel::new(generation, link);
        let offer = channel.offer().await?;
        s.peer = Some(channel);

        s.signal(SignalMessage::new(SignalKind::Offer, s.id.as_str(), offer));
        self.arm_negotiation_timeout(s.id.clone(), generation);
        Ok(())
    }

    /// Inbound signaling text from a connection
    pub async fn handle_message(&self, connection: &ConnectionId, text: &str) {
        let Some(id) = self.connections.get(connection).map(|e| e.value().clone()) else {
            debug!(connection = %connection, "Message for unknown connection");
            return;
        };
        let Some(session) = self.session(&id) else {
            return;
        };

        let message = match SignalMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(session_id = %id, error = %e, "Unparseable signaling message");
                let s = session.lock().await;
                s.signal(SignalMessage::error(id.as_str(), &e));
                return;
            }
        };

        if message.kind == SignalKind::Join {
            let target = message
                .session_id
                .as_deref()
                .filter(|t| !t.is_empty() && *t != id.as_str())
                .map(SessionId::new);
            if let Some(target) = target {
                if self.awaits_reconnect(&target).await {
                    let world = join_world(&message.body).or_else(|| self.default_world.clone());
                    self.resume(&id, target, world).await;
                    return;
                }
                debug!(session_id = %id, target = %target, "Join names no resumable session, joining fresh");
            }
        }

        let mut s = session.lock().await;
        if s.state == SessionState::Closed || s.connection.as_ref() != Some(connection) {
            return;
        }
        s.touch();

        if let Err(e) = self.dispatch(&mut s, message).await {
            warn!(session_id = %id, state = ?s.state, error = %e, "Signaling message rejected");
            self.fail_locked(&mut s, e);
        }
    }

    async fn dispatch(&self, s: &mut Session, message: SignalMessage) -> HostResult<()> {
        match message.kind {
            SignalKind::Join => {
                // Renegotiation on a live socket after the peer channel dropped
                if s.state == SessionState::Reconnecting {
                    return self.open_peer_channel(s).await;
                }
                let request: JoinRequest = if message.body.is_null() {
                    JoinRequest::default()
                } else {
                    serde_json::from_value(message.body)
                        .map_err(|e| HostError::Protocol(format!("invalid join: {}", e)))?
                };
                let world = request
                    .world
                    .or_else(|| self.default_world.clone())
                    .ok_or_else(|| HostError::Protocol("join names no world".to_string()))?;
                self.start_negotiation(s, &world).await
            }
            SignalKind::Offer => {
                let answer = peer_mut(s)?.on_remote_offer(message.body).await?;
                s.signal(SignalMessage::new(SignalKind::Answer, s.id.as_str(), answer));
                Ok(())
            }
            SignalKind::Answer => peer_mut(s)?.on_remote_answer(message.body).await,
            SignalKind::Candidate => peer_mut(s)?.on_remote_candidate(message.body).await,
            SignalKind::Data => peer_mut(s)?.relay_inbound(message.body),
            SignalKind::Leave => {
                self.close_locked(s, CloseReason::ClientLeft);
                Ok(())
            }
            SignalKind::Error => Err(HostError::Protocol(
                "error messages are host-only".to_string(),
            )),
        }
    }

    async fn awaits_reconnect(&self, id: &SessionId) -> bool {
        match self.session(id) {
            Some(session) => session.lock().await.state == SessionState::Reconnecting,
            None => false,
        }
    }

    /// Move a provisional connection onto an existing Reconnecting session.
    ///
    /// If the target is gone (grace expired, closed, or never existed) the
    /// provisional session carries on as a fresh one: it negotiates into
    /// `world` when one is known, otherwise it waits for a `join`.
    async fn resume(
        &self,
        provisional_id: &SessionId,
        target_id: SessionId,
        world: Option<String>,
    ) {
        let Some(provisional) = self.session(provisional_id) else {
            return;
        };

        let (principal, connection, outbound) = {
            let mut p = provisional.lock().await;
            if p.state != SessionState::Authenticating {
                self.fail_locked(
                    &mut p,
                    HostError::Protocol("resume must precede join".to_string()),
                );
                return;
            }
            match (p.principal.clone(), p.connection.clone(), p.outbound.clone()) {
                (Some(principal), Some(connection), Some(outbound)) => {
                    (principal, connection, outbound)
                }
                _ => return,
            }
        };

        let result = match self.session(&target_id) {
            Some(target) if target_id != *provisional_id => {
                let mut t = target.lock().await;
                self.attach_resumed(&mut t, &principal, connection, outbound)
                    .await
            }
            _ => Err(HostError::SessionNotFound(target_id.to_string())),
        };

        let mut p = provisional.lock().await;
        match result {
            Ok(()) => {
                // The socket now belongs to the resumed session
                p.connection = None;
                p.outbound = None;
                self.close_locked(&mut p, CloseReason::Superseded);
            }
            Err(HostError::SessionNotFound(_)) => {
                if p.state != SessionState::Authenticating {
                    return;
                }
                info!(
                    session_id = %provisional_id,
                    target = %target_id,
                    "Resume target gone, continuing as a new session"
                );
                if let Some(world) = world {
                    if let Err(e) = self.start_negotiation(&mut p, &world).await {
                        self.fail_locked(&mut p, e);
                    }
                }
            }
            Err(e) => {
                warn!(
                    session_id = %provisional_id,
                    target = %target_id,
                    error = %e,
                    "Session resume refused"
                );
                self.close_locked(&mut p, CloseReason::Error(e));
            }
        }
    }

    async fn attach_resumed(
        &self,
        t: &mut Session,
        principal: &Principal,
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> HostResult<()> {
        if t.state != SessionState::Reconnecting {
            return Err(HostError::SessionNotFound(format!(
                "{} is not awaiting reconnection",
                t.id
            )));
        }
        let same_principal = match &t.principal {
            Some(owner) => owner == principal || (owner.anonymous && principal.anonymous),
            None => false,
        };
        if !same_principal {
            return Err(HostError::Unauthorized(
                "session belongs to another principal".to_string(),
            ));
        }

        if let Some(old) = t.connection.replace(connection.clone()) {
            self.connections.remove(&old);
        }
        if let Some(old) = t.outbound.replace(outbound) {
            let _ = old.send(Outbound::Close {
                code: CloseReason::Superseded.close_code(),
                reason: CloseReason::Superseded.to_string(),
            });
        }
        self.connections.insert(connection, t.id.clone());
        t.touch();

        let world = t.world.as_ref().map(|w| w.key().to_string());
        t.signal(SignalMessage::new(
            SignalKind::Join,
            t.id.as_str(),
            json!({ "world": world, "principal": t.principal, "resumed": true }),
        ));
        info!(session_id = %t.id, "Session resuming");

        if let Err(e) = self.open_peer_channel(t).await {
            // Stays Reconnecting; the grace timer still applies
            warn!(session_id = %t.id, error = %e, "Renegotiation failed");
            t.release_peer();
            t.signal(SignalMessage::error(t.id.as_str(), &e));
        }
        Ok(())
    }

    /// The signaling socket went away
    pub async fn handle_disconnect(&self, connection: &ConnectionId) {
        let Some((_, id)) = self.connections.remove(connection) else {
            return;
        };
        let Some(session) = self.session(&id) else {
            return;
        };

        let mut s = session.lock().await;
        if s.connection.as_ref() != Some(connection) {
            return;
        }
        s.connection = None;
        s.outbound = None;

        match s.state {
            SessionState::Open => self.enter_reconnecting(&mut s),
            SessionState::Reconnecting => s.release_peer(),
            SessionState::Closed => {}
            _ => {
                self.close_locked(&mut s, CloseReason::Disconnected);
            }
        }
    }

    pub async fn handle_peer_event(&self, notice: PeerNotice) {
        let Some(session) = self.session(&notice.session_id) else {
            return;
        };
        let mut s = session.lock().await;
        if s.peer_generation != notice.generation || s.peer.is_none() {
            debug!(
                session_id = %notice.session_id,
                generation = notice.generation,
                "Stale peer event ignored"
            );
            return;
        }

        match notice.event {
            PeerEvent::Opened => self.on_peer_open(&mut s),
            PeerEvent::LocalCandidate(candidate) => {
                if let Some(peer) = s.peer.as_mut() {
                    peer.note_local_candidate();
                }
                s.signal(SignalMessage::new(
                    SignalKind::Candidate,
                    s.id.as_str(),
                    candidate,
                ));
            }
            PeerEvent::Message(frame) => self.on_peer_message(&mut s, frame),
            PeerEvent::Closed => self.on_peer_lost(&mut s),
        }
    }

    fn on_peer_open(&self, s: &mut Session) {
        let resumed = match s.state {
            SessionState::Negotiating => false,
            SessionState::Reconnecting => true,
            _ => return,
        };
        let Some(world) = s.world.clone() else {
            let error =
                HostError::InvariantViolation(format!("session {} opened without a world", s.id));
            self.fail_locked(s, error);
            return;
        };

        if let Some(peer) = s.peer.as_mut() {
            if let Err(e) = peer.mark_open() {
                self.fail_locked(s, e);
                return;
            }
        }
        if let Err(e) = s.transition(SessionState::Open) {
            self.fail_locked(s, e);
            return;
        }

        if !s.joined {
            self.registry.mark_joined(&s.id);
            s.joined = true;
        }

        let (snapshot, changes) = world.store().snapshot_and_subscribe();
        s.send_peer(PeerFrame::Snapshot { snapshot });
        s.stop_forwarder();
        s.forwarder = Some(self.spawn_forwarder(s.id.clone(), s.epoch, changes));

        info!(
            session_id = %s.id,
            world = %world.key(),
            generation = s.peer_generation,
            resumed,
            "Session open"
        );
    }

    fn spawn_forwarder(
        &self,
        id: SessionId,
        epoch: u64,
        mut changes: broadcast::Receiver<StoreChange>,
    ) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            loop {
                let change = match changes.recv().await {
                    Ok(change) => Some(change),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(session_id = %id, skipped, "Change stream lagged, resending snapshot");
                        None
                    }
                    Err(RecvError::Closed) => break,
                };

                let Some(manager) = this.upgrade() else {
                    break;
                };
                let Some(session) = manager.session(&id) else {
                    break;
                };
                let mut s = session.lock().await;
                if s.epoch != epoch || s.state != SessionState::Open {
                    break;
                }

                let frame = match change {
                    Some(change) => PeerFrame::Change { change },
                    None => match &s.world {
                        Some(world) => PeerFrame::Snapshot {
                            snapshot: world.snapshot(),
                        },
                        None => break,
                    },
                };
                s.send_peer(frame);
            }
        })
    }

    fn on_peer_message(&self, s: &mut Session, frame: Value) {
        if s.state != SessionState::Open {
            debug!(session_id = %s.id, state = ?s.state, "Peer data before open dropped");
            return;
        }
        if let Some(peer) = s.peer.as_mut() {
            peer.note_received();
        }
        let Some(world) = s.world.clone() else {
            return;
        };

        let reply = match serde_json::from_value::<PeerRequest>(frame) {
            Ok(request) => match request.apply(world.store(), s.id.as_str()) {
                Ok(entity) => PeerFrame::Ack { entity },
                Err(e) => {
                    debug!(session_id = %s.id, error = %e, "Simulation request rejected");
                    PeerFrame::Rejected {
                        error: e.to_string(),
                    }
                }
            },
            Err(e) => PeerFrame::Rejected {
                error: format!("invalid request: {}", e),
            },
        };
        s.send_peer(reply);
    }

    fn on_peer_lost(&self, s: &mut Session) {
        match s.state {
            SessionState::Open => self.enter_reconnecting(s),
            SessionState::Negotiating => {
                self.close_locked(
                    s,
                    CloseReason::Error(HostError::Transport(
                        "peer channel lost during negotiation".to_string(),
                    )),
                );
            }
            SessionState::Reconnecting => s.release_peer(),
            _ => {}
        }
    }

    fn enter_reconnecting(&self, s: &mut Session) {
        if let Err(e) = s.transition(SessionState::Reconnecting) {
            warn!(session_id = %s.id, error = %e, "Cannot enter reconnect");
            return;
        }
        s.stop_forwarder();
        s.release_peer();
        self.arm_reconnect_grace(s.id.clone(), s.epoch);
        info!(
            session_id = %s.id,
            grace_ms = self.config.reconnect_grace_ms,
            "Session reconnecting"
        );
    }

    fn arm_negotiation_timeout(&self, id: SessionId, generation: u64) {
        let this = self.this.clone();
        let timeout = self.config.negotiation_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(manager) = this.upgrade() {
                manager.expire_negotiation(&id, generation).await;
            }
        });
    }

    async fn expire_negotiation(&self, id: &SessionId, generation: u64) {
        let Some(session) = self.session(id) else {
            return;
        };
        let mut s = session.lock().await;
        let unopened = s.peer_generation == generation
            && s.peer.as_ref().is_some_and(|peer| !peer.is_open());
        if !unopened {
            return;
        }

        match s.state {
            SessionState::Negotiating => {
                warn!(session_id = %id, "Peer channel negotiation timed out");
                self.close_locked(&mut s, CloseReason::Error(HostError::NegotiationTimeout));
            }
            SessionState::Reconnecting => {
                warn!(session_id = %id, "Renegotiation timed out");
                s.release_peer();
                s.signal(SignalMessage::error(id.as_str(), &HostError::NegotiationTimeout));
            }
            _ => {}
        }
    }

    fn arm_reconnect_grace(&self, id: SessionId, epoch: u64) {
        let this = self.this.clone();
        let grace = self.config.reconnect_grace();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(manager) = this.upgrade() {
                manager.expire_reconnect(&id, epoch).await;
            }
        });
    }

    async fn expire_reconnect(&self, id: &SessionId, epoch: u64) {
        let Some(session) = self.session(id) else {
            return;
        };
        let mut s = session.lock().await;
        if s.state == SessionState::Reconnecting && s.epoch == epoch {
            self.close_locked(&mut s, CloseReason::GraceExpired);
        }
    }

    /// Close a session. Idempotent; returns whether this call closed it.
    pub async fn close(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(session) = self.session(id) else {
            return false;
        };
        let mut s = session.lock().await;
        self.close_locked(&mut s, reason)
    }

    pub async fn kick(&self, id: &SessionId) -> bool {
        self.close(id, CloseReason::Kicked).await
    }

    /// Destroy a world and close every session bound to it
    pub async fn recycle_world(&self, key: &str) -> usize {
        let sessions = self.registry.recycle(key);
        let mut closed = 0;
        for id in &sessions {
            let reason = CloseReason::Error(HostError::InstanceUnavailable(format!(
                "world '{}' recycled",
                key
            )));
            if self.close(id, reason).await {
                closed += 1;
            }
        }
        closed
    }

    fn close_locked(&self, s: &mut Session, reason: CloseReason) -> bool {
        if s.state == SessionState::Closed {
            return false;
        }
        let previous = s.state;
        s.state = SessionState::Closed;
        s.epoch += 1;

        s.stop_forwarder();
        s.release_peer();
        if s.world.take().is_some() {
            self.registry.unbind(&s.id);
        }
        if let Some(outbound) = s.outbound.take() {
            let _ = outbound.send(Outbound::Close {
                code: reason.close_code(),
                reason: reason.to_string(),
            });
        }
        if let Some(connection) = s.connection.take() {
            self.connections.remove(&connection);
        }
        self.sessions.remove(&s.id);

        info!(
            session_id = %s.id,
            previous_state = ?previous,
            reason = %reason,
            "Session closed"
        );
        true
    }

    /// Recoverable errors are reported to the client; anything else ends
    /// the session. Invariant violations are also raised to the process.
    fn fail_locked(&self, s: &mut Session, error: HostError) {
        if error.is_fatal() {
            error!(session_id = %s.id, error = %error, "Fatal session error");
            let _ = self.fatal_tx.send(error.clone());
        }

        match error {
            HostError::Protocol(_) | HostError::Store(_) => {
                s.signal(SignalMessage::error(s.id.as_str(), &error));
            }
            other => {
                self.close_locked(s, CloseReason::Error(other));
            }
        }
    }

    /// Stop admitting sessions, fail unopened ones, wait up to `grace` for
    /// the rest to leave, then force-close stragglers. Returns how many were
    /// force-closed.
    pub async fn drain(&self, grace: Duration) -> usize {
        self.draining.store(true, Ordering::SeqCst);
        info!(
            sessions = self.sessions.len(),
            grace_ms = grace.as_millis() as u64,
            "Draining sessions"
        );

        for id in self.session_ids() {
            let Some(session) = self.session(&id) else {
                continue;
            };
            let mut s = session.lock().await;
            if s.state.is_pending() {
                self.close_locked(
                    &mut s,
                    CloseReason::Error(HostError::InstanceUnavailable(
                        "host is draining".to_string(),
                    )),
                );
            }
        }

        let deadline = Instant::now() + grace;
        while !self.sessions.is_empty() && Instant::now() < deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(remaining.min(Duration::from_millis(50))).await;
        }

        let mut forced = 0;
        for id in self.session_ids() {
            if self.close(&id, CloseReason::Drained).await {
                forced += 1;
            }
        }
        if forced > 0 {
            warn!(forced, "Sessions force-closed at end of drain");
        }
        forced
    }

    fn session(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.get(id).map(|e| Arc::clone(e.value()))
    }

    #[cfg(test)]
    pub(crate) fn session_handle(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.session(id)
    }

    pub async fn session_info(&self, id: &SessionId) -> Option<SessionInfo> {
        let session = self.session(id)?;
        let s = session.lock().await;
        Some(SessionInfo {
            id: s.id.clone(),
            state: s.state,
            principal: s.principal.clone(),
            world: s.world.as_ref().map(|w| w.key().to_string()),
            peer_generation: s.peer_generation,
            joined: s.joined,
            created_at: s.created_at,
            last_activity: s.last_activity,
        })
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Arc<WorldRegistry> {
        &self.registry
    }

    /// Errors that must take the process down
    pub fn subscribe_fatal(&self) -> broadcast::Receiver<HostError> {
        self.fatal_tx.subscribe()
    }
}

fn peer_mut(s: &mut Session) -> HostResult<&mut PeerChannel> {
    let state = s.state;
    s.peer
        .as_mut()
        .ok_or_else(|| HostError::Protocol(format!("no peer channel in state {:?}", state)))
}

/// World named in a `join` body, if any
fn join_world(body: &Value) -> Option<String> {
    if body.is_null() {
        return None;
    }
    serde_json::from_value::<JoinRequest>(body.clone())
        .ok()
        .and_then(|request| request.world)
        .filter(|world| !world.is_empty())
}
