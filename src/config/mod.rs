use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_PATH: &str = "worldhost.toml";

/// Complete host configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3030
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

/// Handshake credential configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// When false, connections without a known token get an anonymous principal
    #[serde(default = "default_auth_enabled")]
    pub enabled: bool,
    /// Static token -> principal id table
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// World used when the client names none
    #[serde(default)]
    pub default_world: Option<String>,
}

fn default_auth_enabled() -> bool {
    true
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: default_auth_enabled(),
            tokens: HashMap::new(),
            default_world: None,
        }
    }
}

/// Session handshake timing
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Maximum time a peer channel may stay half-open
    #[serde(default = "default_negotiation_timeout")]
    pub negotiation_timeout_ms: u64,
    /// How long a disconnected session keeps its world binding
    #[serde(default = "default_reconnect_grace")]
    pub reconnect_grace_ms: u64,
}

fn default_negotiation_timeout() -> u64 {
    10_000
}

fn default_reconnect_grace() -> u64 {
    15_000
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn reconnect_grace(&self) -> Duration {
        Duration::from_millis(self.reconnect_grace_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: default_negotiation_timeout(),
            reconnect_grace_ms: default_reconnect_grace(),
        }
    }
}

/// World instance registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    /// Delay before an empty, non-persistent world is torn down
    #[serde(default = "default_teardown_grace")]
    pub teardown_grace_ms: u64,
    /// Worlds created at startup and never torn down for being empty
    #[serde(default)]
    pub preload: Vec<String>,
    /// Per-world session cap (unlimited when absent)
    #[serde(default)]
    pub max_sessions_per_world: Option<usize>,
}

fn default_teardown_grace() -> u64 {
    30_000
}

impl WorldConfig {
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            teardown_grace_ms: default_teardown_grace(),
            preload: Vec::new(),
            max_sessions_per_world: None,
        }
    }
}

/// How the process is deployed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Reports to a fleet orchestrator sidecar
    Managed,
    /// Local run, no orchestrator
    Standalone,
}

impl std::str::FromStr for DeploymentMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "managed" => Ok(DeploymentMode::Managed),
            "standalone" | "local" => Ok(DeploymentMode::Standalone),
            other => Err(format!("unknown deployment mode '{}'", other)),
        }
    }
}

/// Lifecycle controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default = "default_mode")]
    pub mode: DeploymentMode,
    #[serde(default = "default_health_interval")]
    pub health_interval_ms: u64,
    /// Time box for every orchestrator call
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_ms: u64,
    /// How long open sessions may continue once draining starts
    #[serde(default = "default_drain_grace")]
    pub drain_grace_ms: u64,
    /// Logged pause before a standalone process re-execs itself
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,
}

fn default_mode() -> DeploymentMode {
    DeploymentMode::Managed
}

fn default_health_interval() -> u64 {
    1_000
}

fn default_rpc_timeout() -> u64 {
    2_000
}

fn default_drain_grace() -> u64 {
    30_000
}

fn default_restart_delay() -> u64 {
    2_000
}

impl LifecycleConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            health_interval_ms: default_health_interval(),
            rpc_timeout_ms: default_rpc_timeout(),
            drain_grace_ms: default_drain_grace(),
            restart_delay_ms: default_restart_delay(),
        }
    }
}

/// Orchestrator sidecar configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_sidecar_url")]
    pub sidecar_url: String,
    /// Poll interval for allocation state
    #[serde(default = "default_watch_interval")]
    pub watch_interval_ms: u64,
}

fn default_sidecar_url() -> String {
    "http://localhost:9358".to_string()
}

fn default_watch_interval() -> u64 {
    1_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            sidecar_url: default_sidecar_url(),
            watch_interval_ms: default_watch_interval(),
        }
    }
}

impl HostConfig {
    /// Apply env var overrides on top of file values
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`. An unknown mode is an error rather than
    /// a silent fall back to the file value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WORLDHOST_MODE") {
            self.lifecycle.mode = v
                .parse::<DeploymentMode>()
                .map_err(|e| anyhow!("WORLDHOST_MODE: {}", e))?;
        }
        if let Some(v) = lookup("WORLDHOST_PORT") {
            self.server.port = v
                .parse::<u16>()
                .with_context(|| format!("WORLDHOST_PORT '{}' is not a valid port", v))?;
        }
        if let Some(v) = lookup("WORLDHOST_SIDECAR_URL") {
            if !v.trim().is_empty() {
                self.orchestrator.sidecar_url = v;
            }
        }
        Ok(())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<HostConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: HostConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Resolve configuration for the binary.
///
/// `WORLDHOST_CONFIG` names a file that must exist; otherwise
/// `worldhost.toml` is used when present, else defaults. Env overrides are
/// applied last.
pub fn load_from_env() -> Result<HostConfig> {
    let mut config = match std::env::var("WORLDHOST_CONFIG") {
        Ok(path) => load_config(Path::new(&path))?,
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            load_config(Path::new(DEFAULT_CONFIG_PATH))?
        }
        Err(_) => {
            info!("No config file found, using defaults");
            HostConfig::default()
        }
    };
    config.apply_env()?;
    Ok(config)
}
