use crate::config::LifecycleConfig;
use crate::error::{HostError, HostResult};
use crate::lifecycle::orchestrator::{OrchestratorClient, OrchestratorSignal};
use crate::lifecycle::state::LifecycleState;
use crate::session::SessionManager;
use crate::world::WorldRegistry;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Reports readiness, health and allocation to the orchestrator and runs the
/// drain sequence.
pub struct LifecycleController {
    state_tx: watch::Sender<LifecycleState>,
    orchestrator: Arc<dyn OrchestratorClient>,
    registry: Arc<WorldRegistry>,
    sessions: Arc<SessionManager>,
    config: LifecycleConfig,
    health_failures: AtomicU64,
    /// Failures since the last successful health call
    consecutive_failures: AtomicU64,
}

impl LifecycleController {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorClient>,
        registry: Arc<WorldRegistry>,
        sessions: Arc<SessionManager>,
        config: LifecycleConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Unregistered);
        Self {
            state_tx,
            orchestrator,
            registry,
            sessions,
            config,
            health_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state_tx.subscribe()
    }

    /// Total failed health calls
    pub fn health_failures(&self) -> u64 {
        self.health_failures.load(Ordering::Relaxed)
    }

    fn transition(&self, next: LifecycleState) -> HostResult<()> {
        let mut result = Ok(());
        self.state_tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                info!(from = ?*current, to = ?next, "Lifecycle transition");
                *current = next;
                true
            } else {
                result = Err(HostError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Orchestrator call bounded by the configured rpc timeout
    async fn rpc<F>(&self, call: &str, fut: F) -> HostResult<()>
    where
        F: Future<Output = HostResult<()>>,
    {
        match tokio::time::timeout(self.config.rpc_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(HostError::OrchestratorRpcFailure(format!(
                "{} timed out after {}ms",
                call, self.config.rpc_timeout_ms
            ))),
        }
    }

    /// Connect and report ready. Any failure here is fatal to startup.
    pub async fn start(&self) -> HostResult<()> {
        self.rpc("connect", self.orchestrator.connect()).await?;
        self.rpc("ready", self.orchestrator.ready()).await?;
        self.transition(LifecycleState::Ready)?;
        info!("Host registered with orchestrator");
        Ok(())
    }

    /// One health report. Failures are counted and logged, never escalated.
    pub async fn tick_health(&self) -> HostResult<()> {
        if !self.state().reports_health() {
            return Ok(());
        }

        match self.rpc("health", self.orchestrator.health()).await {
            Ok(()) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                let total = self.health_failures.fetch_add(1, Ordering::Relaxed) + 1;
                let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    error = %e,
                    consecutive,
                    total,
                    "Health report failed"
                );
                Err(e)
            }
        }
    }

    /// Report health every interval while Ready or Allocated
    pub async fn run_health_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.health_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.state() {
                LifecycleState::Draining | LifecycleState::ShuttingDown => break,
                LifecycleState::Unregistered => continue,
                LifecycleState::Ready | LifecycleState::Allocated => {
                    let _ = self.tick_health().await;
                }
            }
        }
        info!("Health loop stopped");
    }

    /// React to orchestrator allocation signals until deallocated
    pub async fn run_signal_loop(self: Arc<Self>) {
        let mut signals = self.orchestrator.signals();
        loop {
            match signals.recv().await {
                Ok(OrchestratorSignal::Allocate) => {
                    if let Err(e) = self.allocate() {
                        warn!(error = %e, "Ignoring allocate signal");
                    }
                }
                Ok(OrchestratorSignal::Deallocate) => {
                    if let Err(e) = self.drain().await {
                        warn!(error = %e, "Ignoring deallocate signal");
                    }
                    break;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Orchestrator signals lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Ready -> Allocated; the registry starts accepting binds
    pub fn allocate(&self) -> HostResult<()> {
        self.transition(LifecycleState::Allocated)?;
        self.registry.open_for_binds();
        Ok(())
    }

    /// Stop admitting sessions, let open ones finish within the drain grace,
    /// tell the orchestrator and tear everything down. Returns the number of
    /// sessions force-closed.
    pub async fn drain(&self) -> HostResult<usize> {
        self.transition(LifecycleState::Draining)?;
        self.registry.begin_drain();

        let forced = self.sessions.drain(self.config.drain_grace()).await;

        if let Err(e) = self.rpc("shutdown", self.orchestrator.shutdown()).await {
            error!(error = %e, "Orchestrator shutdown call failed");
        }

        let remaining = self.registry.teardown_all();
        if !remaining.is_empty() {
            warn!(sessions = remaining.len(), "Bindings left at teardown");
        }

        self.transition(LifecycleState::ShuttingDown)?;
        info!(forced, "Drain complete");
        Ok(forced)
    }

    /// Resolves once the controller reaches ShuttingDown
    pub async fn wait_for_shutdown(&self) {
        let mut state = self.state_tx.subscribe();
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}
