use crate::lifecycle::LifecycleState;
use crate::store::StoreError;
use thiserror::Error;

/// Close codes sent on the signaling channel when a session ends with an error
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL: u16 = 1011;
    pub const KICKED: u16 = 4000;
    pub const PROTOCOL: u16 = 4400;
    pub const UNAUTHORIZED: u16 = 4401;
    pub const NEGOTIATION_TIMEOUT: u16 = 4408;
    pub const INSTANCE_UNAVAILABLE: u16 = 4503;
}

/// Host error taxonomy
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HostError {
    /// Bad or missing credential at handshake
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Handshake exceeded its negotiation window
    #[error("peer channel negotiation timed out")]
    NegotiationTimeout,

    /// Bind attempted against a draining, missing or full world instance
    #[error("world instance unavailable: {0}")]
    InstanceUnavailable(String),

    /// Store policy violation from the simulation layer
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Orchestrator call failed (transient outside of startup)
    #[error("orchestrator rpc failed: {0}")]
    OrchestratorRpcFailure(String),

    /// Session/instance bookkeeping is inconsistent
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Lifecycle state machine rejected a transition
    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    /// Malformed or out-of-order signaling payload
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("session {0} not found")]
    SessionNotFound(String),

    /// Peer transport failure
    #[error("transport error: {0}")]
    Transport(String),
}

impl HostError {
    /// Close code reported to the client when this error ends its session
    pub fn close_code(&self) -> u16 {
        match self {
            HostError::Unauthorized(_) => close_code::UNAUTHORIZED,
            HostError::NegotiationTimeout => close_code::NEGOTIATION_TIMEOUT,
            HostError::InstanceUnavailable(_) => close_code::INSTANCE_UNAVAILABLE,
            HostError::InvariantViolation(_) => close_code::INTERNAL,
            _ => close_code::PROTOCOL,
        }
    }

    /// Only corrupted bookkeeping is fatal to the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, HostError::InvariantViolation(_))
    }
}

pub type HostResult<T> = Result<T, HostError>;
