use crate::config::OrchestratorConfig;
use crate::error::{HostError, HostResult};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Allocation change pushed by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorSignal {
    Allocate,
    Deallocate,
}

/// Calls the host makes to its orchestrator
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn connect(&self) -> HostResult<()>;
    async fn ready(&self) -> HostResult<()>;
    async fn health(&self) -> HostResult<()>;
    async fn shutdown(&self) -> HostResult<()>;

    /// Allocate / Deallocate notifications
    fn signals(&self) -> broadcast::Receiver<OrchestratorSignal>;
}

/// State the sidecar reports while this host serves players
const ALLOCATED_STATE: &str = "Allocated";

/// Orchestrator client speaking to a local HTTP sidecar.
///
/// Lifecycle calls are POSTs to `/ready`, `/health` and `/shutdown`.
/// Allocation is observed by polling `GET /gameserver` and reading
/// `status.state`.
pub struct HttpSidecarClient {
    http_client: Client,
    base_url: String,
    watch_interval: Duration,
    signals_tx: broadcast::Sender<OrchestratorSignal>,
    watch: Mutex<Option<JoinHandle<()>>>,
}

impl HttpSidecarClient {
    pub fn new(config: &OrchestratorConfig, rpc_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(concat!("worldhost/", env!("CARGO_PKG_VERSION")))
            .timeout(rpc_timeout)
            .build()
            .context("Failed to build sidecar HTTP client")?;
        let (signals_tx, _) = broadcast::channel(16);

        Ok(Self {
            http_client,
            base_url: config.sidecar_url.trim_end_matches('/').to_string(),
            watch_interval: Duration::from_millis(config.watch_interval_ms),
            signals_tx,
            watch: Mutex::new(None),
        })
    }

    async fn post(&self, path: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .with_context(|| format!("Failed to send POST {}", path))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Sidecar returned {} for POST {}", status, path);
        }
        Ok(())
    }

    /// Current game server state reported by the sidecar
    pub async fn game_server_state(&self) -> Result<String> {
        fetch_state(&self.http_client, &self.base_url).await
    }
}

async fn fetch_state(http_client: &Client, base_url: &str) -> Result<String> {
    let response = http_client
        .get(format!("{}/gameserver", base_url))
        .send()
        .await
        .context("Failed to send GET /gameserver")?;

    let status = response.status();
    if !status.is_success() {
        bail!("Sidecar returned {} for GET /gameserver", status);
    }

    let body: Value = response
        .json()
        .await
        .context("Failed to parse /gameserver response")?;
    body.pointer("/status/state")
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("Missing status.state in /gameserver response")
}

/// Signal to emit when the allocation flag moves from `previous` to `allocated`
pub(crate) fn allocation_signal(
    previous: Option<bool>,
    allocated: bool,
) -> Option<OrchestratorSignal> {
    match (previous, allocated) {
        (Some(true), true) => None,
        (_, true) => Some(OrchestratorSignal::Allocate),
        (Some(true), false) => Some(OrchestratorSignal::Deallocate),
        (_, false) => None,
    }
}

async fn watch_allocation(
    http_client: Client,
    base_url: String,
    period: Duration,
    signals_tx: broadcast::Sender<OrchestratorSignal>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut previous: Option<bool> = None;

    loop {
        ticker.tick().await;

        let state = match fetch_state(&http_client, &base_url).await {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %format!("{:#}", e), "Allocation poll failed");
                continue;
            }
        };

        let allocated = state == ALLOCATED_STATE;
        if let Some(signal) = allocation_signal(previous, allocated) {
            info!(state = %state, signal = ?signal, "Allocation changed");
            let _ = signals_tx.send(signal);
        }
        previous = Some(allocated);
    }
}

fn rpc_failure(call: &str, e: anyhow::Error) -> HostError {
    HostError::OrchestratorRpcFailure(format!("{}: {:#}", call, e))
}

#[async_trait]
impl OrchestratorClient for HttpSidecarClient {
    /// Verify the sidecar answers, then start watching allocation
    async fn connect(&self) -> HostResult<()> {
        let state = self
            .game_server_state()
            .await
            .map_err(|e| rpc_failure("connect", e))?;
        info!(url = %self.base_url, state = %state, "Connected to orchestrator sidecar");

        {
            let mut watch = self.watch.lock().unwrap_or_else(PoisonError::into_inner);
            if watch.is_none() {
                *watch = Some(tokio::spawn(watch_allocation(
                    self.http_client.clone(),
                    self.base_url.clone(),
                    self.watch_interval,
                    self.signals_tx.clone(),
                )));
            }
        }
        Ok(())
    }

    async fn ready(&self) -> HostResult<()> {
        self.post("/ready").await.map_err(|e| rpc_failure("ready", e))
    }

    async fn health(&self) -> HostResult<()> {
        self.post("/health").await.map_err(|e| rpc_failure("health", e))
    }

    async fn shutdown(&self) -> HostResult<()> {
        self.post("/shutdown")
            .await
            .map_err(|e| rpc_failure("shutdown", e))
    }

    fn signals(&self) -> broadcast::Receiver<OrchestratorSignal> {
        self.signals_tx.subscribe()
    }
}

impl Drop for HttpSidecarClient {
    fn drop(&mut self) {
        let watch = self.watch.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = watch.take() {
            handle.abort();
            debug!("Allocation watch stopped");
        }
    }
}
