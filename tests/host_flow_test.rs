// End-to-end host flows driven through the public API: an orchestrated host
// is registered, allocated, serves a session over the relay transport and is
// drained. The signaling socket is replaced by the outbound channel the
// WebSocket pump would read from.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use worldhost::auth::{Credential, TokenAuthenticator};
use worldhost::config::{AuthConfig, LifecycleConfig, SessionConfig, WorldConfig};
use worldhost::error::{close_code, HostResult};
use worldhost::lifecycle::{
    LifecycleController, LifecycleState, OrchestratorClient, OrchestratorSignal,
};
use worldhost::session::{
    ConnectionId, Outbound, RelayTransport, SessionId, SessionManager, SessionState, SignalKind,
    SignalMessage,
};
use worldhost::world::{WorldEvent, WorldRegistry};

struct FakeOrchestrator {
    shutdowns: AtomicUsize,
    signals_tx: broadcast::Sender<OrchestratorSignal>,
}

impl FakeOrchestrator {
    fn new() -> Self {
        let (signals_tx, _) = broadcast::channel(8);
        Self {
            shutdowns: AtomicUsize::new(0),
            signals_tx,
        }
    }
}

#[async_trait]
impl OrchestratorClient for FakeOrchestrator {
    async fn connect(&self) -> HostResult<()> {
        Ok(())
    }

    async fn ready(&self) -> HostResult<()> {
        Ok(())
    }

    async fn health(&self) -> HostResult<()> {
        Ok(())
    }

    async fn shutdown(&self) -> HostResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<OrchestratorSignal> {
        self.signals_tx.subscribe()
    }
}

struct Host {
    registry: Arc<WorldRegistry>,
    sessions: Arc<SessionManager>,
    controller: Arc<LifecycleController>,
    orchestrator: Arc<FakeOrchestrator>,
}

fn host(drain_grace_ms: u64) -> Host {
    let registry = Arc::new(WorldRegistry::new(
        WorldConfig {
            teardown_grace_ms: 0,
            ..WorldConfig::default()
        },
        false,
    ));
    let auth = AuthConfig {
        tokens: [("tok-alice".to_string(), "alice".to_string())]
            .into_iter()
            .collect(),
        ..AuthConfig::default()
    };
    let sessions = SessionManager::new(
        Arc::clone(&registry),
        Arc::new(TokenAuthenticator::new(&auth)),
        Arc::new(RelayTransport),
        SessionConfig {
            negotiation_timeout_ms: 2_000,
            reconnect_grace_ms: 2_000,
        },
        None,
    );

    let orchestrator = Arc::new(FakeOrchestrator::new());
    let controller = Arc::new(LifecycleController::new(
        Arc::clone(&orchestrator) as Arc<dyn OrchestratorClient>,
        Arc::clone(&registry),
        Arc::clone(&sessions),
        LifecycleConfig {
            health_interval_ms: 20,
            rpc_timeout_ms: 200,
            drain_grace_ms,
            ..LifecycleConfig::default()
        },
    ));

    Host {
        registry,
        sessions,
        controller,
        orchestrator,
    }
}

struct Client {
    conn: ConnectionId,
    id: SessionId,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl Client {
    async fn connect(sessions: &SessionManager, world: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::generate();
        let credential = Credential {
            token: Some("tok-alice".to_string()),
            world: Some(world.to_string()),
            session: None,
        };
        let id = sessions.handle_connect(conn.clone(), credential, tx).await;
        Self { conn, id, rx }
    }

    async fn next(&mut self) -> Outbound {
        tokio::time::timeout(Duration::from_secs(2), self.rx.recv())
            .await
            .expect("timed out waiting for outbound message")
            .expect("outbound channel closed")
    }

    async fn expect(&mut self, kind: SignalKind) -> SignalMessage {
        match self.next().await {
            Outbound::Signal(message) if message.kind == kind => message,
            other => panic!("expected {:?}, got {:?}", kind, other),
        }
    }

    async fn send(&self, sessions: &SessionManager, kind: &str, body: Value) {
        let message = json!({ "type": kind, "sessionId": self.id.as_str(), "body": body });
        sessions
            .handle_message(&self.conn, &message.to_string())
            .await;
    }
}

/// Handshake through to the opening snapshot
async fn open_session(sessions: &SessionManager, world: &str) -> Client {
    let mut client = Client::connect(sessions, world).await;
    client.expect(SignalKind::Join).await;
    client.expect(SignalKind::Offer).await;
    client.send(sessions, "answer", json!({ "mode": "relay" })).await;
    let snapshot = client.expect(SignalKind::Data).await;
    assert_eq!(snapshot.body["frame"], "snapshot");
    client
}

#[tokio::test]
async fn test_unallocated_host_refuses_sessions() {
    let host = host(50);
    host.controller.start().await.unwrap();
    assert_eq!(host.controller.state(), LifecycleState::Ready);

    let mut client = Client::connect(&host.sessions, "w1").await;

    match client.next().await {
        Outbound::Close { code, .. } => assert_eq!(code, close_code::INSTANCE_UNAVAILABLE),
        other => panic!("expected close, got {:?}", other),
    }
    assert_eq!(host.registry.bound_session_count(), 0);
}

#[tokio::test]
async fn test_session_joins_and_simulates_after_allocation() {
    let host = host(50);
    host.controller.start().await.unwrap();
    tokio::spawn(Arc::clone(&host.controller).run_signal_loop());
    let mut events = host.registry.subscribe();

    host.orchestrator
        .signals_tx
        .send(OrchestratorSignal::Allocate)
        .unwrap();
    let mut state = host.controller.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == LifecycleState::Allocated),
    )
    .await
    .unwrap()
    .unwrap();

    let mut client = open_session(&host.sessions, "w1").await;
    let info = host.sessions.session_info(&client.id).await.unwrap();
    assert_eq!(info.state, SessionState::Open);
    assert!(info.joined);

    client
        .send(
            &host.sessions,
            "data",
            json!({ "op": "spawn", "components": { "transform": { "position": { "x": 0.0, "y": 1.0, "z": 0.0 } } } }),
        )
        .await;
    let ack = client.expect(SignalKind::Data).await;
    assert_eq!(ack.body["frame"], "ack");
    let change = client.expect(SignalKind::Data).await;
    assert_eq!(change.body["change"]["change"], "entity_spawned");

    let snapshot = host.registry.snapshot("w1").unwrap();
    assert_eq!(snapshot.entities.len(), 1);

    assert!(matches!(
        events.recv().await.unwrap(),
        WorldEvent::InstanceCreated { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        WorldEvent::SessionJoined { .. }
    ));
}

#[tokio::test]
async fn test_deallocate_drains_open_sessions() {
    let host = host(50);
    host.controller.start().await.unwrap();
    host.controller.allocate().unwrap();
    tokio::spawn(Arc::clone(&host.controller).run_signal_loop());

    let mut client = open_session(&host.sessions, "w1").await;

    host.orchestrator
        .signals_tx
        .send(OrchestratorSignal::Deallocate)
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), host.controller.wait_for_shutdown())
        .await
        .unwrap();

    // The open session outlived the grace period and was closed going-away
    loop {
        match client.next().await {
            Outbound::Close { code, .. } => {
                assert_eq!(code, close_code::GOING_AWAY);
                break;
            }
            Outbound::Signal(_) => {}
        }
    }

    assert_eq!(host.controller.state(), LifecycleState::ShuttingDown);
    assert_eq!(host.orchestrator.shutdowns.load(Ordering::SeqCst), 1);
    assert_eq!(host.sessions.session_count(), 0);
    assert_eq!(host.registry.world_count(), 0);
    assert!(!host.registry.is_accepting());
}

#[tokio::test]
async fn test_session_leaving_during_drain_is_not_forced() {
    let host = host(2_000);
    host.controller.start().await.unwrap();
    host.controller.allocate().unwrap();

    let client = open_session(&host.sessions, "w1").await;

    let controller = Arc::clone(&host.controller);
    let drain = tokio::spawn(async move { controller.drain().await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    client.send(&host.sessions, "leave", Value::Null).await;

    let forced = tokio::time::timeout(Duration::from_secs(2), drain)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(forced, 0);
    assert_eq!(host.controller.state(), LifecycleState::ShuttingDown);
}

#[tokio::test]
async fn test_concurrent_connects_share_one_instance() {
    let host = host(50);
    host.controller.start().await.unwrap();
    host.controller.allocate().unwrap();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let sessions = Arc::clone(&host.sessions);
        tasks.push(tokio::spawn(async move {
            open_session(&sessions, "arena").await.id
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }

    assert_eq!(host.registry.world_count(), 1);
    let arena = host.registry.get("arena").unwrap();
    assert_eq!(arena.session_count(), 8);
    for id in &ids {
        assert!(arena.contains_session(id));
    }
}
