// Session handshake and peer channel management

mod manager;
mod peer;
mod protocol;
mod state;

pub use manager::{SessionInfo, SessionManager};
pub use peer::{
    Negotiation, PeerChannel, PeerContext, PeerEvent, PeerLink, PeerNotice, PeerTransport,
    RelayTransport,
};
pub use protocol::{JoinRequest, Outbound, PeerFrame, PeerRequest, SignalKind, SignalMessage};
pub use state::{CloseReason, Session, SessionState};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;


/// Stable id of one logical client session. Survives reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Time-ordered id for a new session
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One signaling socket. A session keeps its id across connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a connection id (conn_ prefix + 8 random alphanumeric chars)
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let random: String = (0..8)
            .map(|_| {
                let idx = rng.gen_range(0..36);
                if idx < 10 {
                    (b'0' + idx) as char
                } else {
                    (b'a' + idx - 10) as char
                }
            })
            .collect();
        Self(format!("conn_{}", random))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
