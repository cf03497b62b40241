use crate::error::{HostError, HostResult};
use crate::session::protocol::{Outbound, SignalKind, SignalMessage};
use crate::session::SessionId;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Event raised by a peer link
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Channel established; data may flow
    Opened,
    /// Locally gathered candidate to forward to the client
    LocalCandidate(Value),
    /// Inbound payload from the client
    Message(Value),
    /// Transport lost the channel
    Closed,
}

/// Peer event tagged with the session and channel generation it belongs to
#[derive(Debug, Clone)]
pub struct PeerNotice {
    pub session_id: SessionId,
    pub generation: u64,
    pub event: PeerEvent,
}

/// Handed to a transport when a channel is created
#[derive(Clone)]
pub struct PeerContext {
    pub session_id: SessionId,
    pub generation: u64,
    pub events: mpsc::UnboundedSender<PeerNotice>,
    /// The session's signaling connection at the time the channel was created
    pub signaling: mpsc::UnboundedSender<Outbound>,
}

impl PeerContext {
    pub fn emit(&self, event: PeerEvent) {
        let notice = PeerNotice {
            session_id: self.session_id.clone(),
            generation: self.generation,
            event,
        };
        if self.events.send(notice).is_err() {
            debug!(session_id = %self.session_id, "Peer event pump stopped");
        }
    }
}

/// Creates peer links. One link per negotiation attempt.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn open(&self, ctx: PeerContext) -> HostResult<Box<dyn PeerLink>>;
}

/// Transport-level half of a peer channel
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Produce the host's offer
    async fn create_offer(&self) -> HostResult<Value>;

    /// Accept a client offer and produce the answer
    async fn accept_offer(&self, offer: Value) -> HostResult<Value>;

    async fn accept_answer(&self, answer: Value) -> HostResult<()>;

    async fn add_candidate(&self, candidate: Value) -> HostResult<()>;

    fn send(&self, frame: Value) -> HostResult<()>;

    /// Client payload that arrived over the signaling socket
    fn relay_inbound(&self, _frame: Value) -> HostResult<()> {
        Err(HostError::Protocol(
            "data frames are not relayed on this transport".to_string(),
        ))
    }

    /// Tear down transport resources. Called exactly once.
    fn close(&self);
}

/// Negotiation progress of one peer channel
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiation {
    pub offer_sent: bool,
    pub offer_received: bool,
    pub answer_sent: bool,
    pub answer_received: bool,
    pub local_candidates: u32,
    pub remote_candidates: u32,
}

/// Host side of a session's data channel. Owns its link and releases it
/// exactly once, on `release` or on drop.
pub struct PeerChannel {
    generation: u64,
    link: Box<dyn PeerLink>,
    negotiation: Negotiation,
    open: bool,
    released: bool,
    /// Frames sent before the channel opened
    pending: VecDeque<Value>,
    frames_sent: u64,
    frames_received: u64,
}

impl PeerChannel {
    pub fn new(generation: u64, link: Box<dyn PeerLink>) -> Self {
        Self {
            generation,
            link,
            negotiation: Negotiation::default(),
            open: false,
            released: false,
            pending: VecDeque::new(),
            frames_sent: 0,
            frames_received: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn negotiation(&self) -> &Negotiation {
        &self.negotiation
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    fn ensure_live(&self) -> HostResult<()> {
        if self.released {
            return Err(HostError::Transport("peer channel released".to_string()));
        }
        Ok(())
    }

    /// Create the host offer
    pub async fn offer(&mut self) -> HostResult<Value> {
        self.ensure_live()?;
        let offer = self.link.create_offer().await?;
        self.negotiation.offer_sent = true;
        Ok(offer)
    }

    /// Handle a client offer, returning the answer to signal back
    pub async fn on_remote_offer(&mut self, offer: Value) -> HostResult<Value> {
        self.ensure_live()?;
        if self.negotiation.answer_sent {
            return Err(HostError::Protocol("offer already answered".to_string()));
        }
        self.negotiation.offer_received = true;
        let answer = self.link.accept_offer(offer).await?;
        self.negotiation.answer_sent = true;
        Ok(answer)
    }

    pub async fn on_remote_answer(&mut self, answer: Value) -> HostResult<()> {
        self.ensure_live()?;
        if !self.negotiation.offer_sent {
            return Err(HostError::Protocol("answer without an offer".to_string()));
        }
        if self.negotiation.answer_received {
            return Err(HostError::Protocol("duplicate answer".to_string()));
        }
        self.link.accept_answer(answer).await?;
        self.negotiation.answer_received = true;
        Ok(())
    }

    pub async fn on_remote_candidate(&mut self, candidate: Value) -> HostResult<()> {
        self.ensure_live()?;
        self.link.add_candidate(candidate).await?;
        self.negotiation.remote_candidates += 1;
        Ok(())
    }

    pub fn note_local_candidate(&mut self) {
        self.negotiation.local_candidates += 1;
    }

    /// Mark the channel open and flush anything queued before it was
    pub fn mark_open(&mut self) -> HostResult<()> {
        self.ensure_live()?;
        self.open = true;
        while let Some(frame) = self.pending.pop_front() {
            self.link.send(frame)?;
            self.frames_sent += 1;
        }
        Ok(())
    }

    pub fn send(&mut self, frame: Value) -> HostResult<()> {
        self.ensure_live()?;
        if !self.open {
            self.pending.push_back(frame);
            return Ok(());
        }
        self.link.send(frame)?;
        self.frames_sent += 1;
        Ok(())
    }

    /// Client data relayed through signaling
    pub fn relay_inbound(&mut self, frame: Value) -> HostResult<()> {
        self.ensure_live()?;
        self.link.relay_inbound(frame)
    }

    pub fn note_received(&mut self) {
        self.frames_received += 1;
    }

    /// Release transport resources. Returns false if already released.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.open = false;
        self.pending.clear();
        self.link.close();
        debug!(
            generation = self.generation,
            sent = self.frames_sent,
            received = self.frames_received,
            "Peer channel released"
        );
        true
    }
}

impl Drop for PeerChannel {
    fn drop(&mut self) {
        self.release();
    }
}

const RELAY_MODE: &str = "relay";

/// Peer transport that carries channel data over the signaling socket.
///
/// The host offers `{"mode": "relay"}`; a matching answer (or a client offer
/// with the same mode) opens the channel. Client payloads arrive as `data`
/// signaling messages and host frames leave the same way.
#[derive(Debug, Default)]
pub struct RelayTransport;

#[async_trait]
impl PeerTransport for RelayTransport {
    async fn open(&self, ctx: PeerContext) -> HostResult<Box<dyn PeerLink>> {
        Ok(Box::new(RelayLink {
            ctx,
            closed: AtomicBool::new(false),
        }))
    }
}

struct RelayLink {
    ctx: PeerContext,
    closed: AtomicBool,
}

impl RelayLink {
    fn check_mode(description: &Value) -> HostResult<()> {
        match description.get("mode").and_then(Value::as_str) {
            Some(RELAY_MODE) => Ok(()),
            Some(other) => Err(HostError::Transport(format!(
                "unsupported peer mode '{}'",
                other
            ))),
            None => Err(HostError::Protocol(
                "session description has no mode".to_string(),
            )),
        }
    }

    fn ensure_open(&self) -> HostResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HostError::Transport("relay link closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl PeerLink for RelayLink {
    async fn create_offer(&self) -> HostResult<Value> {
        self.ensure_open()?;
        Ok(json!({ "mode": RELAY_MODE }))
    }

    async fn accept_offer(&self, offer: Value) -> HostResult<Value> {
        self.ensure_open()?;
        Self::check_mode(&offer)?;
        self.ctx.emit(PeerEvent::Opened);
        Ok(json!({ "mode": RELAY_MODE }))
    }

    async fn accept_answer(&self, answer: Value) -> HostResult<()> {
        self.ensure_open()?;
        Self::check_mode(&answer)?;
        self.ctx.emit(PeerEvent::Opened);
        Ok(())
    }

    async fn add_candidate(&self, _candidate: Value) -> HostResult<()> {
        // No ICE on the relay path
        self.ensure_open()
    }

    fn send(&self, frame: Value) -> HostResult<()> {
        self.ensure_open()?;
        let message = SignalMessage::new(SignalKind::Data, self.ctx.session_id.as_str(), frame);
        self.ctx
            .signaling
            .send(Outbound::Signal(message))
            .map_err(|_| HostError::Transport("signaling connection closed".to_string()))
    }

    fn relay_inbound(&self, frame: Value) -> HostResult<()> {
        self.ensure_open()?;
        self.ctx.emit(PeerEvent::Message(frame));
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            warn!(session_id = %self.ctx.session_id, "Relay link closed twice");
        }
    }
}
