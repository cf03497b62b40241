use crate::auth::Principal;
use crate::error::{close_code, HostError, HostResult};
use crate::session::peer::{PeerChannel, PeerNotice};
use crate::session::protocol::{Outbound, PeerFrame, SignalMessage};
use crate::session::{ConnectionId, SessionId};
use crate::world::WorldHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Session handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticating,
    Negotiating,
    Open,
    Reconnecting,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticating)
                | (Authenticating, Negotiating)
                | (Negotiating, Open)
                | (Open, Reconnecting)
                | (Reconnecting, Open)
                | (Connecting | Authenticating | Negotiating | Open | Reconnecting, Closed)
        )
    }

    /// Not yet Open for the first time
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Authenticating | SessionState::Negotiating
        )
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq)]
pub enum CloseReason {
    /// Client sent `leave`
    ClientLeft,
    /// Signaling socket dropped before the session was ever open
    Disconnected,
    Kicked,
    /// Reconnect grace period ran out
    GraceExpired,
    /// Remaining sessions force-closed at the end of a drain
    Drained,
    /// Provisional session replaced by a resumed one
    Superseded,
    Error(HostError),
}

impl CloseReason {
    pub fn close_code(&self) -> u16 {
        match self {
            CloseReason::ClientLeft
            | CloseReason::Disconnected
            | CloseReason::GraceExpired
            | CloseReason::Superseded => close_code::NORMAL,
            CloseReason::Kicked => close_code::KICKED,
            CloseReason::Drained => close_code::GOING_AWAY,
            CloseReason::Error(e) => e.close_code(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::ClientLeft => write!(f, "client left"),
            CloseReason::Disconnected => write!(f, "disconnected"),
            CloseReason::Kicked => write!(f, "kicked"),
            CloseReason::GraceExpired => write!(f, "reconnect grace expired"),
            CloseReason::Drained => write!(f, "host shutting down"),
            CloseReason::Superseded => write!(f, "superseded by resumed session"),
            CloseReason::Error(e) => write!(f, "{}", e),
        }
    }
}

/// One client's logical connection to a world
pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    pub(crate) principal: Option<Principal>,
    pub(crate) world: Option<WorldHandle>,
    pub(crate) peer: Option<PeerChannel>,
    /// Bumped on every state change; timers armed under an older epoch are stale
    pub(crate) epoch: u64,
    pub(crate) peer_generation: u64,
    /// Join announced to the world (first Open only)
    pub(crate) joined: bool,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) outbound: Option<mpsc::UnboundedSender<Outbound>>,
    /// Streams store changes to the peer while Open
    pub(crate) forwarder: Option<JoinHandle<()>>,
    /// Feeds this session's peer event worker; handed to every peer link
    pub(crate) peer_events: mpsc::UnboundedSender<PeerNotice>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_activity: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<Outbound>,
        peer_events: mpsc::UnboundedSender<PeerNotice>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Connecting,
            principal: None,
            world: None,
            peer: None,
            epoch: 0,
            peer_generation: 0,
            joined: false,
            connection: Some(connection),
            outbound: Some(outbound),
            forwarder: None,
            peer_events,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn world(&self) -> Option<&WorldHandle> {
        self.world.as_ref()
    }

    pub(crate) fn transition(&mut self, next: SessionState) -> HostResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(HostError::Protocol(format!(
                "session cannot move from {:?} to {:?}",
                self.state, next
            )));
        }
        self.state = next;
        self.epoch += 1;
        Ok(())
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Send on the signaling connection, if one is attached
    pub(crate) fn signal(&self, message: SignalMessage) {
        if let Some(tx) = &self.outbound {
            if tx.send(Outbound::Signal(message)).is_err() {
                warn!(session_id = %self.id, "Signaling connection gone, message dropped");
            }
        }
    }

    /// Send over the peer channel; queued until the channel opens
    pub(crate) fn send_peer(&mut self, frame: PeerFrame) {
        let Some(peer) = self.peer.as_mut() else {
            return;
        };
        let value = match serde_json::to_value(&frame) {
            Ok(value) => value,
            Err(e) => {
                warn!(session_id = %self.id, error = %e, "Failed to encode peer frame");
                return;
            }
        };
        if let Err(e) = peer.send(value) {
            warn!(session_id = %self.id, error = %e, "Peer send failed");
        }
    }

    pub(crate) fn stop_forwarder(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Release the peer channel, if any
    pub(crate) fn release_peer(&mut self) {
        if let Some(mut peer) = self.peer.take() {
            peer.release();
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("principal", &self.principal)
            .field("world", &self.world.as_ref().map(|w| w.key().to_string()))
            .field("peer_generation", &self.peer_generation)
            .finish()
    }
}
